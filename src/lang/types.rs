use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Size of a word in bytes. Every type occupies a whole number of words.
pub const WORD_BYTES: i32 = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeModelError {
    #[error("unknown field '{field}' on {ty}")]
    UnknownField { field: String, ty: String },
    #[error("duplicate field '{field}' in struct {name}")]
    DuplicateField { name: String, field: String },
    #[error("struct {name} has no fields")]
    EmptyStruct { name: String },
    #[error("type '{name}' already declared")]
    DuplicateType { name: String },
    #[error("unknown type '{name}'")]
    UnknownType { name: String },
}

/// Opaque scalar such as `int` or `char`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseType {
    pub name: String,
    pub words: usize,
}

/// `count == 0` is a plain pointer; `count > 0` is an inline array.
#[derive(Debug, Clone)]
pub struct PointerType {
    pub pointee: Box<Type>,
    pub count: usize,
}

/// Named fields laid out back to back. Struct literals produce anonymous
/// structs that carry field types only.
#[derive(Debug, Clone)]
pub struct StructType {
    name: Option<String>,
    field_names: Vec<String>,
    field_types: Vec<Type>,
}

#[derive(Debug, Clone)]
pub enum Type {
    Base(BaseType),
    Pointer(PointerType),
    Struct(StructType),
}

impl Type {
    pub fn base(name: &str, words: usize) -> Type {
        Type::Base(BaseType {
            name: name.to_string(),
            words,
        })
    }

    pub fn int() -> Type {
        Type::base("int", 1)
    }

    pub fn char() -> Type {
        Type::base("char", 1)
    }

    pub fn void() -> Type {
        Type::base("void", 1)
    }

    pub fn pointer(pointee: Type) -> Type {
        Type::array(pointee, 0)
    }

    pub fn array(pointee: Type, count: usize) -> Type {
        Type::Pointer(PointerType {
            pointee: Box::new(pointee),
            count,
        })
    }

    /// Words this type occupies on the stack or inside a struct.
    pub fn words(&self) -> usize {
        match self {
            Type::Base(b) => b.words,
            Type::Pointer(p) if p.count == 0 => 1,
            Type::Pointer(p) => p.count * p.pointee.words(),
            Type::Struct(s) => s.words(),
        }
    }

    /// Words materialized for an array's element storage; the plain size for
    /// everything else.
    pub fn alloc_words(&self) -> usize {
        match self {
            Type::Pointer(p) if p.count > 0 => p.count * p.pointee.words(),
            other => other.words(),
        }
    }

    pub fn is_int(&self) -> bool {
        *self == Type::int()
    }

    /// Base types and plain pointers: the values operators work on.
    pub fn is_scalar(&self) -> bool {
        match self {
            Type::Base(b) => b.words == 1,
            Type::Pointer(p) => p.count == 0,
            Type::Struct(_) => false,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            Type::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&PointerType> {
        match self {
            Type::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_plain_pointer(&self) -> bool {
        matches!(self, Type::Pointer(p) if p.count == 0)
    }
}

/// Structural equality: names of structs and fields never matter.
impl PartialEq for Type {
    fn eq(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Base(a), Type::Base(b)) => a == b,
            (Type::Pointer(a), Type::Pointer(b)) => a.count == b.count && a.pointee == b.pointee,
            (Type::Struct(a), Type::Struct(b)) => a.field_types == b.field_types,
            _ => false,
        }
    }
}

impl Eq for Type {}

impl StructType {
    pub fn new(name: &str, fields: Vec<(String, Type)>) -> Result<Self, TypeModelError> {
        if fields.is_empty() {
            return Err(TypeModelError::EmptyStruct {
                name: name.to_string(),
            });
        }
        let mut field_names: Vec<String> = Vec::with_capacity(fields.len());
        let mut field_types = Vec::with_capacity(fields.len());
        for (field, ty) in fields {
            if field_names.contains(&field) {
                return Err(TypeModelError::DuplicateField {
                    name: name.to_string(),
                    field,
                });
            }
            field_names.push(field);
            field_types.push(ty);
        }
        Ok(StructType {
            name: Some(name.to_string()),
            field_names,
            field_types,
        })
    }

    /// Type of a struct literal, inferred from its elements.
    pub fn anonymous(field_types: Vec<Type>) -> Self {
        StructType {
            name: None,
            field_names: Vec::new(),
            field_types,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }

    pub fn field_types(&self) -> &[Type] {
        &self.field_types
    }

    pub fn words(&self) -> usize {
        self.field_types.iter().map(Type::words).sum()
    }

    fn position(&self, field: &str) -> Result<usize, TypeModelError> {
        self.field_names
            .iter()
            .position(|f| f == field)
            .ok_or_else(|| TypeModelError::UnknownField {
                field: field.to_string(),
                ty: Type::Struct(self.clone()).to_string(),
            })
    }

    pub fn field_type(&self, field: &str) -> Result<&Type, TypeModelError> {
        Ok(&self.field_types[self.position(field)?])
    }

    /// Word offset of `field` from the start of the struct.
    pub fn field_offset(&self, field: &str) -> Result<usize, TypeModelError> {
        let idx = self.position(field)?;
        Ok(self.field_types[..idx].iter().map(Type::words).sum())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Base(b) => f.write_str(&b.name),
            Type::Pointer(p) if p.count == 0 => write!(f, "{}*", p.pointee),
            Type::Pointer(p) => write!(f, "{}[{}]", p.pointee, p.count),
            Type::Struct(s) => match &s.name {
                Some(name) => write!(f, "struct {name}"),
                None => {
                    f.write_str("{")?;
                    for (i, ty) in s.field_types.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{ty}")?;
                    }
                    f.write_str("}")
                }
            },
        }
    }
}

/// Name -> type table filled by struct declarations.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, Type>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        let mut types = HashMap::new();
        for ty in [Type::int(), Type::char(), Type::void()] {
            types.insert(ty.to_string(), ty);
        }
        TypeRegistry { types }
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_struct<S: Into<String>>(
        &mut self,
        name: &str,
        fields: impl IntoIterator<Item = (S, Type)>,
    ) -> Result<Type, TypeModelError> {
        if self.types.contains_key(name) {
            return Err(TypeModelError::DuplicateType {
                name: name.to_string(),
            });
        }
        let fields = fields.into_iter().map(|(n, t)| (n.into(), t)).collect();
        let ty = Type::Struct(StructType::new(name, fields)?);
        self.types.insert(name.to_string(), ty.clone());
        Ok(ty)
    }

    pub fn get(&self, name: &str) -> Result<Type, TypeModelError> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| TypeModelError::UnknownType {
                name: name.to_string(),
            })
    }
}
