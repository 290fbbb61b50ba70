//! SSA values, operations, functions and modules.
//!
//! A [`Function`] owns a flat table of SSA values and an ordered list of
//! operations forming a single block. Values are handles into the table;
//! they are created by function arguments and operation results and never
//! reused, so a handle stays valid while operations are erased around it.

use crate::attributes::Attribute;
use crate::types::Type;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ──────────────────────────────── Location ────────────────────────────────

/// Source location attached to operations and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Location {
    #[default]
    Unknown,
    /// A named location, e.g. the host graph node an op was imported from.
    Name(String),
    File {
        file: String,
        line: u32,
        column: u32,
    },
}

impl Location {
    pub fn name(name: impl Into<String>) -> Self {
        Location::Name(name.into())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Unknown => f.write_str("loc(unknown)"),
            Location::Name(name) => write!(f, "loc({:?})", name),
            Location::File { file, line, column } => {
                write!(f, "loc({:?}:{}:{})", file, line, column)
            }
        }
    }
}

// ──────────────────────────────── Values ────────────────────────────────

/// Handle to an SSA value of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub(crate) u32);

impl Value {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

// ──────────────────────────────── Operations ────────────────────────────────

/// A single operation in a function body.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    name: String,
    operands: Vec<Value>,
    results: Vec<Value>,
    attributes: BTreeMap<String, Attribute>,
    location: Location,
}

impl Operation {
    /// Fully qualified name, e.g. `onnx.Add`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dialect namespace (the part before the first dot).
    pub fn dialect(&self) -> &str {
        self.name.split_once('.').map_or("", |(ns, _)| ns)
    }

    /// Name without the dialect prefix.
    pub fn op_name(&self) -> &str {
        self.name.split_once('.').map_or(&self.name, |(_, op)| op)
    }

    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    pub fn results(&self) -> &[Value] {
        &self.results
    }

    pub fn result(&self, index: usize) -> Option<Value> {
        self.results.get(index).copied()
    }

    pub fn attributes(&self) -> &BTreeMap<String, Attribute> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

/// Everything needed to create an [`Operation`].
#[derive(Debug, Clone)]
pub struct OperationState {
    pub name: String,
    pub operands: Vec<Value>,
    pub result_types: Vec<Type>,
    pub attributes: BTreeMap<String, Attribute>,
    pub location: Location,
}

impl OperationState {
    pub fn new(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            operands: Vec::new(),
            result_types: Vec::new(),
            attributes: BTreeMap::new(),
            location,
        }
    }

    pub fn add_operands(mut self, operands: &[Value]) -> Self {
        self.operands.extend_from_slice(operands);
        self
    }

    pub fn add_results(mut self, types: impl IntoIterator<Item = Type>) -> Self {
        self.result_types.extend(types);
        self
    }

    pub fn add_attribute(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

// ──────────────────────────────── Function ────────────────────────────────

/// A function with a single-block body.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    name: String,
    arguments: Vec<Value>,
    result_types: Vec<Type>,
    value_types: Vec<Type>,
    operations: Vec<Operation>,
    attributes: BTreeMap<String, Attribute>,
    location: Location,
}

impl Function {
    /// Create an empty function. Argument values are created from
    /// `argument_types`.
    pub fn new(
        name: impl Into<String>,
        argument_types: Vec<Type>,
        result_types: Vec<Type>,
        location: Location,
    ) -> Self {
        let mut function = Self {
            name: name.into(),
            arguments: Vec::with_capacity(argument_types.len()),
            result_types,
            value_types: Vec::new(),
            operations: Vec::new(),
            attributes: BTreeMap::new(),
            location,
        };
        for ty in argument_types {
            let value = function.new_value(ty);
            function.arguments.push(value);
        }
        function
    }

    fn new_value(&mut self, ty: Type) -> Value {
        let value = Value(self.value_types.len() as u32);
        self.value_types.push(ty);
        value
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn argument_types(&self) -> Vec<&Type> {
        self.arguments
            .iter()
            .filter_map(|&v| self.value_type(v))
            .collect()
    }

    pub fn result_types(&self) -> &[Type] {
        &self.result_types
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn attributes(&self) -> &BTreeMap<String, Attribute> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Attribute) {
        self.attributes.insert(name.into(), value);
    }

    /// Type of a value, or `None` for a handle from another function.
    pub fn value_type(&self, value: Value) -> Option<&Type> {
        self.value_types.get(value.index())
    }

    /// Number of values ever created in this function.
    pub fn value_count(&self) -> usize {
        self.value_types.len()
    }

    /// Append an operation at the end of the body and return its results.
    pub fn append(&mut self, state: OperationState) -> Vec<Value> {
        let results: Vec<Value> = state
            .result_types
            .into_iter()
            .map(|ty| self.new_value(ty))
            .collect();
        self.operations.push(Operation {
            name: state.name,
            operands: state.operands,
            results: results.clone(),
            attributes: state.attributes,
            location: state.location,
        });
        results
    }

    /// The operation defining `value`, if it is an operation result.
    pub fn defining_op(&self, value: Value) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|op| op.results.contains(&value))
    }

    /// Whether any operation uses `value` as an operand.
    pub fn has_uses(&self, value: Value) -> bool {
        self.operations
            .iter()
            .any(|op| op.operands.contains(&value))
    }

    /// Rewrite every use of `from` to `to`. Returns the number of uses
    /// rewritten.
    pub fn replace_all_uses_with(&mut self, from: Value, to: Value) -> usize {
        let mut count = 0;
        for op in &mut self.operations {
            for operand in &mut op.operands {
                if *operand == from {
                    *operand = to;
                    count += 1;
                }
            }
        }
        count
    }

    /// Erase operations for which `keep` returns false.
    pub fn retain_operations(&mut self, mut keep: impl FnMut(&Operation) -> bool) {
        self.operations.retain(|op| keep(op));
    }
}

// ──────────────────────────────── Module ────────────────────────────────

/// Top-level container of functions with unique symbol names.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    sym_name: Option<String>,
    functions: Vec<Function>,
    symbols: HashMap<String, usize>,
    location: Location,
}

impl Module {
    pub fn new(location: Location) -> Self {
        Self {
            sym_name: None,
            functions: Vec::new(),
            symbols: HashMap::new(),
            location,
        }
    }

    pub fn sym_name(&self) -> Option<&str> {
        self.sym_name.as_deref()
    }

    pub fn set_sym_name(&mut self, name: impl Into<String>) {
        self.sym_name = Some(name.into());
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Add a function; its name must not already be defined.
    pub fn add_function(&mut self, function: Function) -> Result<()> {
        if self.symbols.contains_key(function.name()) {
            return Err(Error::DuplicateSymbol(function.name().to_string()));
        }
        self.symbols
            .insert(function.name().to_string(), self.functions.len());
        self.functions.push(function);
        Ok(())
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.symbols.get(name).map(|&i| &self.functions[i])
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.symbols.get(name).map(|&i| &mut self.functions[i])
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ElementType, TensorType};

    fn f32_tensor() -> Type {
        TensorType::static_shape(&[2], ElementType::F32).into()
    }

    #[test]
    fn test_append_creates_results() {
        let mut f = Function::new("f", vec![f32_tensor()], vec![f32_tensor()], Location::Unknown);
        let arg = f.arguments()[0];
        let results = f.append(
            OperationState::new("onnx.Neg", Location::name("neg"))
                .add_operands(&[arg])
                .add_results([f32_tensor()]),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(f.value_count(), 2);
        assert_eq!(f.defining_op(results[0]).unwrap().name(), "onnx.Neg");
        assert!(f.defining_op(arg).is_none());
        assert!(f.has_uses(arg));
    }

    #[test]
    fn test_operation_names() {
        let mut f = Function::new("f", vec![], vec![], Location::Unknown);
        f.append(OperationState::new("func.return", Location::Unknown));
        let op = &f.operations()[0];
        assert_eq!(op.dialect(), "func");
        assert_eq!(op.op_name(), "return");
    }

    #[test]
    fn test_replace_uses_and_erase() {
        let mut f = Function::new("f", vec![f32_tensor()], vec![f32_tensor()], Location::Unknown);
        let arg = f.arguments()[0];
        let id = f.append(
            OperationState::new("onnx.Identity", Location::Unknown)
                .add_operands(&[arg])
                .add_results([f32_tensor()]),
        )[0];
        f.append(OperationState::new("func.return", Location::Unknown).add_operands(&[id]));

        assert_eq!(f.replace_all_uses_with(id, arg), 1);
        f.retain_operations(|op| op.name() != "onnx.Identity");
        assert_eq!(f.operations().len(), 1);
        assert_eq!(f.operations()[0].operands(), &[arg]);
    }

    #[test]
    fn test_module_rejects_duplicate_symbols() {
        let mut module = Module::new(Location::Unknown);
        module.set_sym_name("m");
        module
            .add_function(Function::new("a", vec![], vec![], Location::Unknown))
            .unwrap();
        let err = module
            .add_function(Function::new("a", vec![], vec![], Location::Unknown))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateSymbol(ref name) if name == "a"));
        assert_eq!(module.functions().len(), 1);
        assert_eq!(module.sym_name(), Some("m"));
    }
}
