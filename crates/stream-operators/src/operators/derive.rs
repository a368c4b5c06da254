use std::fmt;
use std::sync::Arc;
use stream_core::{Attribute, DataTuple, DataType, Result, Schema, StreamError, Value};
use stream_runtime::{Arity, Emitter, Operator, Parameter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithmeticOp {
    fn parse(symbol: &str) -> Result<Self> {
        match symbol.trim() {
            "+" | "add" => Ok(ArithmeticOp::Add),
            "-" | "sub" => Ok(ArithmeticOp::Sub),
            "*" | "mul" => Ok(ArithmeticOp::Mul),
            "/" | "div" => Ok(ArithmeticOp::Div),
            other => Err(StreamError::Configuration(format!(
                "unknown arithmetic operator '{}'",
                other
            ))),
        }
    }
}

type DeriveFn = Arc<dyn Fn(&DataTuple) -> Value + Send + Sync>;

/// Expression computing a derived attribute.
#[derive(Clone)]
pub enum Expression {
    Attribute(usize),
    Constant(Value),
    Binary(ArithmeticOp, Box<Expression>, Box<Expression>),
    /// Arbitrary computation with a declared result type
    Function(DataType, DeriveFn),
}

impl Expression {
    pub fn binary(op: ArithmeticOp, left: Expression, right: Expression) -> Self {
        Self::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn function<F>(data_type: DataType, f: F) -> Self
    where
        F: Fn(&DataTuple) -> Value + Send + Sync + 'static,
    {
        Self::Function(data_type, Arc::new(f))
    }

    /// Parses `{"attr": <ref>}`, `{"const": <number>}` or
    /// `{"op": "+", "left": <expr>, "right": <expr>}`.
    pub fn from_parameter(params: &Parameter, schema: &Schema) -> Result<Self> {
        if let Some(attribute) = params.get("attr") {
            return Ok(Expression::Attribute(
                attribute.as_attribute()?.resolve(schema)?,
            ));
        }
        if let Some(constant) = params.get("const") {
            let n = constant.as_f64()?;
            let value = if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                Value::Int64(n as i64)
            } else {
                Value::Float64(n)
            };
            return Ok(Expression::Constant(value));
        }
        let op = ArithmeticOp::parse(params.require("op")?.as_str()?)?;
        Ok(Expression::binary(
            op,
            Self::from_parameter(params.require("left")?, schema)?,
            Self::from_parameter(params.require("right")?, schema)?,
        ))
    }

    /// Result type of the expression over tuples of `schema`. Integer
    /// arithmetic stays integral except for division.
    pub fn data_type(&self, schema: &Schema) -> Result<DataType> {
        match self {
            Expression::Attribute(i) => schema.data_type(*i),
            Expression::Constant(value) => value.data_type().ok_or_else(|| {
                StreamError::Configuration("null constant in expression".to_string())
            }),
            Expression::Binary(op, left, right) => {
                let (l, r) = (left.data_type(schema)?, right.data_type(schema)?);
                for t in [l, r] {
                    if !t.is_numeric() {
                        return Err(StreamError::TypeMismatch {
                            expected: "numeric operand".to_string(),
                            found: t.to_string(),
                        });
                    }
                }
                if l.is_integer() && r.is_integer() && *op != ArithmeticOp::Div {
                    Ok(DataType::Int64)
                } else {
                    Ok(DataType::Float64)
                }
            }
            Expression::Function(data_type, _) => Ok(*data_type),
        }
    }

    /// Evaluates the expression. Nulls propagate; integer overflow and
    /// division by zero give null.
    pub fn evaluate(&self, tuple: &DataTuple) -> Value {
        match self {
            Expression::Attribute(i) => tuple.value(*i).cloned().unwrap_or(Value::Null),
            Expression::Constant(value) => value.clone(),
            Expression::Function(_, f) => f(tuple),
            Expression::Binary(op, left, right) => {
                let (l, r) = (left.evaluate(tuple), right.evaluate(tuple));
                if l.is_null() || r.is_null() {
                    return Value::Null;
                }
                let integral = l.data_type().is_some_and(|t| t.is_integer())
                    && r.data_type().is_some_and(|t| t.is_integer());
                if integral && *op != ArithmeticOp::Div {
                    let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) else {
                        return Value::Null;
                    };
                    let result = match op {
                        ArithmeticOp::Add => a.checked_add(b),
                        ArithmeticOp::Sub => a.checked_sub(b),
                        ArithmeticOp::Mul => a.checked_mul(b),
                        ArithmeticOp::Div => None,
                    };
                    return result.map_or(Value::Null, Value::Int64);
                }
                let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
                    return Value::Null;
                };
                match op {
                    ArithmeticOp::Add => Value::Float64(a + b),
                    ArithmeticOp::Sub => Value::Float64(a - b),
                    ArithmeticOp::Mul => Value::Float64(a * b),
                    ArithmeticOp::Div if b == 0.0 => Value::Null,
                    ArithmeticOp::Div => Value::Float64(a / b),
                }
            }
        }
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Attribute(i) => write!(f, "#{}", i),
            Expression::Constant(v) => write!(f, "{}", v),
            Expression::Binary(op, l, r) => write!(f, "({:?} {:?} {:?})", l, op, r),
            Expression::Function(t, _) => write!(f, "fn -> {}", t),
        }
    }
}

/// Appends computed attributes to every tuple.
pub struct Derive {
    id: String,
    schema: Schema,
    expressions: Vec<Expression>,
}

impl Derive {
    /// `derived` lists the new attribute names with their expressions.
    pub fn new(
        id: impl Into<String>,
        input: &Schema,
        derived: Vec<(String, Expression)>,
    ) -> Result<Self> {
        let id = id.into();
        if derived.is_empty() {
            return Err(StreamError::Configuration(format!(
                "derive '{}' needs at least one expression",
                id
            )));
        }
        let mut attributes = Vec::with_capacity(derived.len());
        let mut expressions = Vec::with_capacity(derived.len());
        for (name, expression) in derived {
            if input.index_of(&name).is_ok() || attributes.iter().any(|a: &Attribute| a.name() == name) {
                return Err(StreamError::Configuration(format!(
                    "derive '{}': attribute '{}' already exists",
                    id, name
                )));
            }
            attributes.push(Attribute::new(name, expression.data_type(input)?));
            expressions.push(expression);
        }
        Ok(Self {
            id,
            schema: input.extend(attributes),
            expressions,
        })
    }

    /// Builds a derive from `{"derived": [{"name": .., "expr": ..}, ..]}`.
    pub fn from_parameters(id: impl Into<String>, input: &Schema, params: &Parameter) -> Result<Self> {
        let derived = params
            .require("derived")?
            .as_list()
            .into_iter()
            .map(|entry| {
                let name = entry.require("name")?.as_str()?.to_string();
                let expression = Expression::from_parameter(entry.require("expr")?, input)?;
                Ok((name, expression))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(id, input, derived)
    }
}

impl Operator for Derive {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "derive"
    }

    fn input_arity(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn process_tuple(&mut self, _input: usize, tuple: DataTuple, out: &mut Emitter) -> Result<()> {
        let derived: Vec<Value> = self.expressions.iter().map(|e| e.evaluate(&tuple)).collect();
        out.emit(tuple.extended(derived))
    }
}
