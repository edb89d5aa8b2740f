//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use std::collections::HashMap;

use super::{
    ast::{BinaryOp, Expr, Program, Stmt, UnaryOp},
    host::HostBridge,
    value::Value,
    GasMeter,
    VmError,
    MEMORY_LIMIT_BYTES,
    STACK_LIMIT,
};

/// Runs one function of a parsed contract to completion.
///
/// The meter is passed in (rather than owned) so that cross-contract
/// re-entries share the transaction's budget.
pub fn run_function(
    program: &Program,
    name: &str,
    args: Vec<Value>,
    host: &mut dyn HostBridge,
    meter: &mut GasMeter,
) -> Result<Value, VmError> {
    let function = program
        .get(name)
        .ok_or_else(|| VmError::UnknownFunction(name.to_string()))?;
    if function.params.len() != args.len() {
        return Err(VmError::Arity {
            name: name.to_string(),
            expected: function.params.len(),
            actual: args.len(),
        });
    }
    let mut interp = Interp {
        program,
        host,
        meter,
        mem_used: 0,
        depth: 0,
    };
    interp.call(function, args)
}

enum Control {
    Normal,
    Return(Value),
}

struct Interp<'a> {
    program: &'a Program,
    host: &'a mut dyn HostBridge,
    meter: &'a mut GasMeter,
    mem_used: usize,
    depth: usize,
}

type Scope = HashMap<String, Value>;

impl<'a> Interp<'a> {
    fn call(&mut self, function: &super::ast::Function, args: Vec<Value>) -> Result<Value, VmError> {
        if self.depth >= STACK_LIMIT {
            return Err(VmError::StackOverflow);
        }
        self.depth += 1;
        let mut scope: Scope = function
            .params
            .iter()
            .cloned()
            .zip(args)
            .collect();
        let result = self.exec_block(&function.body, &mut scope);
        self.depth -= 1;
        match result? {
            Control::Return(value) => Ok(value),
            Control::Normal => Ok(Value::Null),
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: &mut Scope) -> Result<Control, VmError> {
        for stmt in stmts {
            match self.exec(stmt, scope)? {
                Control::Normal => {},
                ret => return Ok(ret),
            }
        }
        Ok(Control::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &mut Scope) -> Result<Control, VmError> {
        self.meter.tick()?;
        match stmt {
            Stmt::Let { name, value } => {
                let value = self.eval(value, scope)?;
                self.charge_memory(&value)?;
                scope.insert(name.clone(), value);
                Ok(Control::Normal)
            },
            Stmt::Assign { name, value } => {
                if !scope.contains_key(name) {
                    return Err(VmError::UnknownIdentifier(name.clone()));
                }
                let value = self.eval(value, scope)?;
                self.charge_memory(&value)?;
                scope.insert(name.clone(), value);
                Ok(Control::Normal)
            },
            Stmt::AssignIndex { name, index, value } => {
                let index = self.eval(index, scope)?.as_int()?;
                let value = self.eval(value, scope)?;
                self.charge_memory(&value)?;
                let target = scope
                    .get_mut(name)
                    .ok_or_else(|| VmError::UnknownIdentifier(name.clone()))?;
                match target {
                    Value::Array(items) => {
                        let len = items.len();
                        let slot = usize::try_from(index)
                            .ok()
                            .and_then(|i| items.get_mut(i))
                            .ok_or(VmError::IndexOutOfBounds { index, len })?;
                        *slot = value;
                        Ok(Control::Normal)
                    },
                    other => Err(VmError::Type(format!(
                        "cannot index into {}",
                        other.type_name()
                    ))),
                }
            },
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Control::Normal)
            },
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                if self.eval(cond, scope)?.truthy() {
                    self.exec_block(then_block, scope)
                } else if let Some(else_block) = else_block {
                    self.exec_block(else_block, scope)
                } else {
                    Ok(Control::Normal)
                }
            },
            Stmt::While { cond, body } => {
                while self.eval(cond, scope)?.truthy() {
                    match self.exec_block(body, scope)? {
                        Control::Normal => {},
                        ret => return Ok(ret),
                    }
                }
                Ok(Control::Normal)
            },
            Stmt::For {
                init,
                cond,
                update,
                body,
            } => {
                self.exec(init, scope)?;
                while self.eval(cond, scope)?.truthy() {
                    match self.exec_block(body, scope)? {
                        Control::Normal => {},
                        ret => return Ok(ret),
                    }
                    self.exec(update, scope)?;
                }
                Ok(Control::Normal)
            },
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Null,
                };
                Ok(Control::Return(value))
            },
        }
    }

    fn eval(&mut self, expr: &Expr, scope: &mut Scope) -> Result<Value, VmError> {
        self.meter.tick()?;
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Ident(name) => scope
                .get(name)
                .cloned()
                .ok_or_else(|| VmError::UnknownIdentifier(name.clone())),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                let value = Value::Array(values);
                self.charge_memory(&value)?;
                Ok(value)
            },
            Expr::Unary { op, expr } => {
                let value = self.eval(expr, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnaryOp::Neg => {
                        let n = value.as_int()?;
                        n.checked_neg().map(Value::Int).ok_or(VmError::Overflow)
                    },
                }
            },
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, scope),
            Expr::Call { name, args } => {
                let function = self
                    .program
                    .get(name)
                    .ok_or_else(|| VmError::UnknownFunction(name.clone()))?;
                if function.params.len() != args.len() {
                    return Err(VmError::Arity {
                        name: name.clone(),
                        expected: function.params.len(),
                        actual: args.len(),
                    });
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                self.call(function, values)
            },
            Expr::HostCall { method, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                self.meter.charge_host_call()?;
                self.host.call(method, &values, self.meter)
            },
            Expr::Index { target, index } => {
                let target = self.eval(target, scope)?;
                let index = self.eval(index, scope)?.as_int()?;
                match target {
                    Value::Array(items) => {
                        let len = items.len();
                        usize::try_from(index)
                            .ok()
                            .and_then(|i| items.get(i).cloned())
                            .ok_or(VmError::IndexOutOfBounds { index, len })
                    },
                    other => Err(VmError::Type(format!("cannot index into {}", other.type_name()))),
                }
            },
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &mut Scope,
    ) -> Result<Value, VmError> {
        // && and || short-circuit
        match op {
            BinaryOp::And => {
                let left = self.eval(left, scope)?;
                if !left.truthy() {
                    return Ok(Value::Bool(false));
                }
                let right = self.eval(right, scope)?;
                return Ok(Value::Bool(right.truthy()));
            },
            BinaryOp::Or => {
                let left = self.eval(left, scope)?;
                if left.truthy() {
                    return Ok(Value::Bool(true));
                }
                let right = self.eval(right, scope)?;
                return Ok(Value::Bool(right.truthy()));
            },
            _ => {},
        }

        let left = self.eval(left, scope)?;
        let right = self.eval(right, scope)?;
        match op {
            BinaryOp::Add => match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or(VmError::Overflow),
                (Value::Str(_), _) | (_, Value::Str(_)) => {
                    let value = Value::Str(format!("{}{}", left.render(), right.render()));
                    self.charge_memory(&value)?;
                    Ok(value)
                },
                _ => Err(VmError::Type(format!(
                    "cannot add {} and {}",
                    left.type_name(),
                    right.type_name()
                ))),
            },
            BinaryOp::Sub => {
                let (a, b) = (left.as_int()?, right.as_int()?);
                a.checked_sub(b).map(Value::Int).ok_or(VmError::Overflow)
            },
            BinaryOp::Mul => {
                let (a, b) = (left.as_int()?, right.as_int()?);
                a.checked_mul(b).map(Value::Int).ok_or(VmError::Overflow)
            },
            BinaryOp::Div => {
                let (a, b) = (left.as_int()?, right.as_int()?);
                if b == 0 {
                    return Err(VmError::DivisionByZero);
                }
                a.checked_div(b).map(Value::Int).ok_or(VmError::Overflow)
            },
            BinaryOp::Rem => {
                let (a, b) = (left.as_int()?, right.as_int()?);
                if b == 0 {
                    return Err(VmError::DivisionByZero);
                }
                a.checked_rem(b).map(Value::Int).ok_or(VmError::Overflow)
            },
            BinaryOp::Eq => Ok(Value::Bool(left == right)),
            BinaryOp::Ne => Ok(Value::Bool(left != right)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = match (&left, &right) {
                    (Value::Int(a), Value::Int(b)) => a.cmp(b),
                    (Value::Str(a), Value::Str(b)) => a.cmp(b),
                    _ => {
                        return Err(VmError::Type(format!(
                            "cannot compare {} and {}",
                            left.type_name(),
                            right.type_name()
                        )))
                    },
                };
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            },
            BinaryOp::And | BinaryOp::Or => unreachable!("short-circuited above"),
        }
    }

    /// Heap values (strings, arrays) count against the frame's allocation
    /// budget; scalars do not.
    fn charge_memory(&mut self, value: &Value) -> Result<(), VmError> {
        if matches!(value, Value::Null | Value::Bool(_) | Value::Int(_)) {
            return Ok(());
        }
        self.mem_used = self.mem_used.saturating_add(value.approx_size());
        if self.mem_used > MEMORY_LIMIT_BYTES {
            return Err(VmError::MemoryLimit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        super::{host::NullBridge, parse, DEFAULT_GAS_LIMIT},
        *,
    };

    fn run(src: &str, name: &str, args: Vec<Value>) -> Result<(Value, u64), VmError> {
        let program = parse(src).unwrap();
        let mut host = NullBridge;
        let mut meter = GasMeter::new(DEFAULT_GAS_LIMIT);
        let value = run_function(&program, name, args, &mut host, &mut meter)?;
        Ok((value, meter.gas_used()))
    }

    const HARDWORK: &str = "function hardwork(n) {\n\
                              let sum = 0;\n\
                              for (let i = 0; i < n; i = i + 1) {\n\
                                sum = sum + i * n;\n\
                              }\n\
                              return sum;\n\
                            }";

    #[test]
    fn hardwork_reference_values() {
        let (value, _) = run(HARDWORK, "hardwork", vec![Value::Int(100)]).unwrap();
        assert_eq!(value, Value::Int(495_000));
        let (value, _) = run(HARDWORK, "hardwork", vec![Value::Int(1000)]).unwrap();
        assert_eq!(value, Value::Int(499_500_000));
    }

    #[test]
    fn hardwork_gas_is_deterministic_and_monotone() {
        let (_, gas_a1) = run(HARDWORK, "hardwork", vec![Value::Int(1000)]).unwrap();
        let (_, gas_a2) = run(HARDWORK, "hardwork", vec![Value::Int(1000)]).unwrap();
        assert_eq!(gas_a1, gas_a2);
        let (_, gas_small) = run(HARDWORK, "hardwork", vec![Value::Int(100)]).unwrap();
        assert!(gas_small < gas_a1);
    }

    #[test]
    fn hardwork_exhausts_the_budget() {
        let program = parse(HARDWORK).unwrap();
        let mut host = NullBridge;
        let mut meter = GasMeter::new(DEFAULT_GAS_LIMIT);
        let result = run_function(&program, "hardwork", vec![Value::Int(100_000)], &mut host, &mut meter);
        assert!(matches!(result, Err(VmError::Interrupted)));
        assert_eq!(meter.gas_used(), DEFAULT_GAS_LIMIT + 1);
    }

    #[test]
    fn arithmetic_and_strings() {
        let src = "function f() { return \"x=\" + (3 * 4 - 2); }";
        let (value, _) = run(src, "f", vec![]).unwrap();
        assert_eq!(value, Value::Str("x=10".to_string()));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(matches!(
            run("function f(n) { return 1 / n; }", "f", vec![Value::Int(0)]),
            Err(VmError::DivisionByZero)
        ));
    }

    #[test]
    fn overflow_is_checked() {
        assert!(matches!(
            run(
                "function f(n) { return n * n; }",
                "f",
                vec![Value::Int(i64::MAX / 2)]
            ),
            Err(VmError::Overflow)
        ));
    }

    #[test]
    fn local_calls_and_recursion_limit() {
        let (value, _) = run(
            "function fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }",
            "fib",
            vec![Value::Int(10)],
        )
        .unwrap();
        assert_eq!(value, Value::Int(55));

        assert!(matches!(
            run("function loop(n) { return loop(n); }", "loop", vec![Value::Int(1)]),
            Err(VmError::StackOverflow)
        ));
    }

    #[test]
    fn arrays_index_and_assign() {
        let src = "function f() {\n\
                     let xs = [1, 2, 3];\n\
                     xs[1] = xs[0] + xs[2];\n\
                     return xs[1];\n\
                   }";
        let (value, _) = run(src, "f", vec![]).unwrap();
        assert_eq!(value, Value::Int(4));
        assert!(matches!(
            run("function f() { let xs = [1]; return xs[5]; }", "f", vec![]),
            Err(VmError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn undefined_names_are_errors() {
        assert!(matches!(
            run("function f() { return nope; }", "f", vec![]),
            Err(VmError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            run("function f() { return nope(); }", "f", vec![]),
            Err(VmError::UnknownFunction(_))
        ));
    }

    #[test]
    fn short_circuit_skips_the_right_side() {
        let (value, _) = run(
            "function f() { return false && (1 / 0); }",
            "f",
            vec![],
        )
        .unwrap();
        assert_eq!(value, Value::Bool(false));
    }
}
