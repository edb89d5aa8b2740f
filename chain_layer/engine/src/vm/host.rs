//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The host bridge: the single seam between a running contract and the node.
//!
//! Every `blockchain.<method>(...)` call flows through `HostBridge::call`.
//! Wrapping a bridge in `RecordingBridge` captures a replayable call log;
//! `ReplayBridge` serves a previously recorded log and flags any divergence,
//! which is how nodes cross-check each other's contract outputs without
//! re-deriving host state.

use serde::{Deserialize, Serialize};

use super::{value::Value, GasMeter, VmError};

pub trait HostBridge {
    fn call(&mut self, method: &str, args: &[Value], meter: &mut GasMeter) -> Result<Value, VmError>;
}

/// A bridge with no capabilities, for pure computation tests.
pub struct NullBridge;

impl HostBridge for NullBridge {
    fn call(&mut self, method: &str, _args: &[Value], _meter: &mut GasMeter) -> Result<Value, VmError> {
        Err(VmError::UnknownHostMethod(method.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCallRecord {
    pub method: String,
    pub args: Vec<serde_json::Value>,
    pub response: serde_json::Value,
}

/// Records every host call alongside its response.
pub struct RecordingBridge<'a> {
    inner: &'a mut dyn HostBridge,
    log: Vec<HostCallRecord>,
}

impl<'a> RecordingBridge<'a> {
    pub fn new(inner: &'a mut dyn HostBridge) -> Self {
        Self { inner, log: Vec::new() }
    }

    pub fn into_log(self) -> Vec<HostCallRecord> {
        self.log
    }
}

impl HostBridge for RecordingBridge<'_> {
    fn call(&mut self, method: &str, args: &[Value], meter: &mut GasMeter) -> Result<Value, VmError> {
        let response = self.inner.call(method, args, meter)?;
        self.log.push(HostCallRecord {
            method: method.to_string(),
            args: args.iter().map(|v| v.to_json()).collect(),
            response: response.to_json(),
        });
        Ok(response)
    }
}

/// Serves a recorded log instead of touching host state. Any mismatch in
/// call order, method or arguments marks the replay as diverged.
pub struct ReplayBridge {
    records: Vec<HostCallRecord>,
    cursor: usize,
}

impl ReplayBridge {
    pub fn new(records: Vec<HostCallRecord>) -> Self {
        Self { records, cursor: 0 }
    }

    /// True when the whole log was consumed, i.e. the replayed run performed
    /// exactly the recorded calls.
    pub fn is_exhausted(&self) -> bool {
        self.cursor == self.records.len()
    }
}

impl HostBridge for ReplayBridge {
    fn call(&mut self, method: &str, args: &[Value], _meter: &mut GasMeter) -> Result<Value, VmError> {
        let record = self.records.get(self.cursor).ok_or(VmError::ReplayMismatch {
            method: method.to_string(),
        })?;
        let actual_args: Vec<serde_json::Value> = args.iter().map(|v| v.to_json()).collect();
        if record.method != method || record.args != actual_args {
            return Err(VmError::ReplayMismatch {
                method: method.to_string(),
            });
        }
        self.cursor += 1;
        Value::from_json(&record.response)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        super::{parse, run_function, DEFAULT_GAS_LIMIT},
        *,
    };

    /// Echoes the call count so each call has a distinct, observable result.
    struct CountingBridge {
        calls: u64,
    }

    impl HostBridge for CountingBridge {
        fn call(&mut self, method: &str, _args: &[Value], _meter: &mut GasMeter) -> Result<Value, VmError> {
            if method != "getBlockHeight" {
                return Err(VmError::UnknownHostMethod(method.to_string()));
            }
            self.calls += 1;
            Ok(Value::Int(self.calls as i64))
        }
    }

    const SRC: &str = "function f() {\n\
                         let a = blockchain.getBlockHeight();\n\
                         let b = blockchain.getBlockHeight();\n\
                         return a + b;\n\
                       }";

    #[test]
    fn recording_then_replaying_matches() {
        let program = parse(SRC).unwrap();
        let mut inner = CountingBridge { calls: 0 };
        let mut recorder = RecordingBridge::new(&mut inner);
        let mut meter = GasMeter::new(DEFAULT_GAS_LIMIT);
        let live = run_function(&program, "f", vec![], &mut recorder, &mut meter).unwrap();
        assert_eq!(live, Value::Int(3));
        let log = recorder.into_log();
        assert_eq!(log.len(), 2);

        let mut replay = ReplayBridge::new(log);
        let mut meter = GasMeter::new(DEFAULT_GAS_LIMIT);
        let replayed = run_function(&program, "f", vec![], &mut replay, &mut meter).unwrap();
        assert_eq!(replayed, live);
        assert!(replay.is_exhausted());
    }

    #[test]
    fn replay_flags_divergence() {
        let log = vec![HostCallRecord {
            method: "getTxSender".to_string(),
            args: vec![],
            response: serde_json::Value::String("addr".to_string()),
        }];
        let program = parse(SRC).unwrap();
        let mut replay = ReplayBridge::new(log);
        let mut meter = GasMeter::new(DEFAULT_GAS_LIMIT);
        let result = run_function(&program, "f", vec![], &mut replay, &mut meter);
        assert!(matches!(result, Err(VmError::ReplayMismatch { .. })));
    }

    #[test]
    fn host_calls_are_metered() {
        let program = parse(SRC).unwrap();
        let mut bridge = CountingBridge { calls: 0 };
        let mut meter = GasMeter::new(DEFAULT_GAS_LIMIT);
        run_function(&program, "f", vec![], &mut bridge, &mut meter).unwrap();
        // two host calls at 7 gas each; the short run never reaches an
        // interrupt boundary
        assert_eq!(meter.gas_used(), 14);
    }
}
