//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

mod address;
mod amount;
mod hash;
mod hashing;
mod keypair;
pub mod shutdown;

pub use address::{Address, AddressError, ADDRESS_TAG_CONTRACT, ADDRESS_TAG_WALLET};
pub use amount::{format_amount, parse_amount, AmountError};
pub use hash::{Hash, HashParseError};
pub use hashing::{
    block_hasher,
    commit_hasher,
    node_token_hasher,
    slice_hasher,
    storage_id_hasher,
    tx_hasher,
    wallet_seed_hasher,
    DomainHasher,
};
pub use keypair::{verify_signature, CryptoError, KeyPair};
