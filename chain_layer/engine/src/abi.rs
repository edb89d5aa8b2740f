//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use serde::{Deserialize, Serialize};

use crate::vm::{Program, VmError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiMethod {
    pub name: String,
    pub arity: usize,
    pub view: bool,
    pub payable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAbi {
    pub methods: Vec<AbiMethod>,
}

impl ContractAbi {
    /// Extracted from the parsed program: every top-level function, in
    /// declaration order.
    pub fn from_program(program: &Program) -> Self {
        Self {
            methods: program
                .functions
                .values()
                .map(|f| AbiMethod {
                    name: f.name.clone(),
                    arity: f.params.len(),
                    view: f.view,
                    payable: f.payable,
                })
                .collect(),
        }
    }

    pub fn method(&self, name: &str) -> Option<&AbiMethod> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// The persisted form of a deployed contract under `contract:<addr>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    pub abi: ContractAbi,
    pub code: String,
    /// Block height the contract was deployed at.
    pub deployed_at: u64,
}

impl ContractRecord {
    pub fn compile(code: &str, deployed_at: u64) -> Result<Self, VmError> {
        let program = crate::vm::parse(code)?;
        Ok(Self {
            abi: ContractAbi::from_program(&program),
            code: code.to_string(),
            deployed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_captures_modifiers_and_arity() {
        let record = ContractRecord::compile(
            "view function balanceOf(addr) { return blockchain.valueGet(addr); }\n\
             payable function deposit() { return null; }\n\
             function helper(a, b) { return a + b; }",
            5,
        )
        .unwrap();
        let abi = &record.abi;
        assert_eq!(abi.methods.len(), 3);
        let balance_of = abi.method("balanceOf").unwrap();
        assert!(balance_of.view && !balance_of.payable);
        assert_eq!(balance_of.arity, 1);
        assert!(abi.method("deposit").unwrap().payable);
        assert_eq!(abi.method("helper").unwrap().arity, 2);
        assert!(abi.method("missing").is_none());
    }

    #[test]
    fn bad_code_fails_compilation() {
        assert!(ContractRecord::compile("function broken( {", 0).is_err());
    }
}
