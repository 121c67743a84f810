/// Declared type of a table field.
///
/// Fields are fixed-length: an integer field always occupies four bytes,
/// a string field occupies its declared length (which includes room for
/// the terminator, so a value must be strictly shorter).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Str { len: usize },
}

impl FieldType {
    /// Number of bytes a value of this type occupies inside a record.
    pub fn byte_len(&self) -> usize {
        match self {
            FieldType::Int => std::mem::size_of::<i32>(),
            FieldType::Str { len } => *len,
        }
    }

    /// Numeric code used by the on-disk catalog (0 = int, 1 = str).
    pub fn type_code(&self) -> u8 {
        match self {
            FieldType::Int => 0,
            FieldType::Str { .. } => 1,
        }
    }

    /// Inverse of [`FieldType::type_code`]; `len` only matters for strings.
    pub fn from_type_code(code: u8, len: usize) -> Option<FieldType> {
        match code {
            0 => Some(FieldType::Int),
            1 => Some(FieldType::Str { len }),
            _ => None,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, FieldType::Int)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::Str { len } => write!(f, "str[{}]", len),
        }
    }
}

/// A single field value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i32),
    Str(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value can be stored in a field of the given type.
    pub fn matches_type(&self, ty: &FieldType) -> bool {
        matches!(
            (self, ty),
            (Value::Int(_), FieldType::Int) | (Value::Str(_), FieldType::Str { .. })
        )
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Comparison operator of a `where` clause.
///
/// The relational operators are evaluated as `cmp(constant, record)` with the
/// query constant on the left, so `<` selects records where `constant > record`
/// and `>` selects records where `constant < record`. `==` requests the
/// binary-search access path and only matches exact equality on a file kept
/// sorted by the searched field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    SortedEq,
}

impl CompareOp {
    /// Parse the operator token of a `where` clause.
    pub fn from_token(tok: &str) -> Option<CompareOp> {
        match tok {
            "=" => Some(CompareOp::Eq),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "!=" => Some(CompareOp::Ne),
            "==" => Some(CompareOp::SortedEq),
            _ => None,
        }
    }

    /// Evaluate the operator with the query constant on the left.
    pub fn matches(&self, val: i32, rec: i32) -> bool {
        match self {
            CompareOp::Eq => val == rec,
            CompareOp::Lt => val > rec,
            CompareOp::Le => val >= rec,
            CompareOp::Gt => val < rec,
            CompareOp::Ge => val <= rec,
            CompareOp::Ne => val != rec,
            CompareOp::SortedEq => val == rec,
        }
    }

    /// True for `==`, which selects the binary-search path.
    pub fn is_sorted_eq(&self) -> bool {
        matches!(self, CompareOp::SortedEq)
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tok = match self {
            CompareOp::Eq => "=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Ne => "!=",
            CompareOp::SortedEq => "==",
        };
        write!(f, "{}", tok)
    }
}
