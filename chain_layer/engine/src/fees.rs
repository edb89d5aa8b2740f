//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The fee formula:
//!
//! ```text
//! fee = feeBasic
//!     + feeCoefAmount * Σ amount[i]
//!     + feeCoefSize   * canonicalByteSize(tx)
//!     + feeCoefCost   * executionCost
//! ```
//!
//! All arithmetic is arbitrary-precision decimal, rounded half-even to 18
//! fractional digits. Transactions in the genesis block never pay fees.

use bigdecimal::{
    rounding::RoundingMode,
    BigDecimal,
    Zero,
};

use crate::config::ChainParams;

pub const FEE_SCALE: i64 = 18;

#[derive(Debug, Clone)]
pub struct FeeCalculator {
    params: ChainParams,
}

impl FeeCalculator {
    pub fn new(params: ChainParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// The fee consumed by a transaction with the given totals, executed in
    /// a block at `block_height`.
    pub fn fee_used(
        &self,
        block_height: u64,
        total_amount: &BigDecimal,
        canonical_size: usize,
        cost: u64,
    ) -> BigDecimal {
        if block_height == 0 {
            return BigDecimal::zero();
        }
        let fee = &self.params.fee_basic
            + &self.params.fee_coef_amount * total_amount
            + &self.params.fee_coef_size * BigDecimal::from(canonical_size as u64)
            + &self.params.fee_coef_cost * BigDecimal::from(cost);
        fee.with_scale_round(FEE_SCALE, RoundingMode::HalfEven).normalized()
    }
}
