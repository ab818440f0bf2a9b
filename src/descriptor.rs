//! Descriptor data model: structured representations of protobuf files,
//! messages, enums, and services as recovered from `FileDescriptorProto`
//! bytes or built directly (well-known types, tests).
//!
//! Fields reference their message/enum types by dotted name only;
//! resolution happens at access time through the registry indices, so
//! mutually recursive messages need no special handling here.

pub mod parse;

use std::collections::BTreeMap;

/// Protobuf field types, numbered as in `FieldDescriptorProto.Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Double = 1,
    Float = 2,
    Int64 = 3,
    Uint64 = 4,
    Int32 = 5,
    Fixed64 = 6,
    Fixed32 = 7,
    Bool = 8,
    String = 9,
    Group = 10,
    Message = 11,
    Bytes = 12,
    Uint32 = 13,
    Enum = 14,
    Sfixed32 = 15,
    Sfixed64 = 16,
    Sint32 = 17,
    Sint64 = 18,
}

impl FieldType {
    pub fn from_number(n: u64) -> Option<Self> {
        Some(match n {
            1 => FieldType::Double,
            2 => FieldType::Float,
            3 => FieldType::Int64,
            4 => FieldType::Uint64,
            5 => FieldType::Int32,
            6 => FieldType::Fixed64,
            7 => FieldType::Fixed32,
            8 => FieldType::Bool,
            9 => FieldType::String,
            10 => FieldType::Group,
            11 => FieldType::Message,
            12 => FieldType::Bytes,
            13 => FieldType::Uint32,
            14 => FieldType::Enum,
            15 => FieldType::Sfixed32,
            16 => FieldType::Sfixed64,
            17 => FieldType::Sint32,
            18 => FieldType::Sint64,
            _ => return None,
        })
    }

    /// True for scalar types that may be encoded packed (everything
    /// except strings, bytes, messages, and groups).
    pub fn is_packable(self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group
        )
    }

    /// True when the field carries a `type_name` reference.
    pub fn has_type_name(self) -> bool {
        matches!(self, FieldType::Message | FieldType::Group | FieldType::Enum)
    }
}

/// Field cardinality, numbered as in `FieldDescriptorProto.Label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldLabel {
    #[default]
    Optional,
    Required,
    Repeated,
}

impl FieldLabel {
    pub fn from_number(n: u64) -> Self {
        match n {
            2 => FieldLabel::Required,
            3 => FieldLabel::Repeated,
            _ => FieldLabel::Optional,
        }
    }
}

/// One field of a message.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: u32,
    pub field_type: FieldType,
    pub label: FieldLabel,
    /// Dotted type name, present for MESSAGE/GROUP/ENUM fields.
    /// Leading-dot fully-qualified markers are stripped on parse.
    pub type_name: Option<String>,
    /// Whether a repeated packable field is encoded packed. Packable
    /// scalars default to packed (proto3 rule); the decoder accepts both
    /// representations regardless.
    pub packed: bool,
    /// Set only on synthetic map fields (hand-built descriptors).
    pub map_key_type: Option<FieldType>,
    pub map_value_type: Option<FieldType>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, number: u32, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            number,
            field_type,
            label: FieldLabel::Optional,
            type_name: None,
            packed: field_type.is_packable(),
            map_key_type: None,
            map_value_type: None,
        }
    }

    pub fn repeated(mut self) -> Self {
        self.label = FieldLabel::Repeated;
        self
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_map_types(mut self, key: FieldType, value: FieldType) -> Self {
        self.map_key_type = Some(key);
        self.map_value_type = Some(value);
        self
    }

    pub fn is_repeated(&self) -> bool {
        self.label == FieldLabel::Repeated
    }

    pub fn is_map(&self) -> bool {
        self.map_key_type.is_some()
    }
}

/// A message type with its fields and nested declarations.
#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    /// Dotted full name, e.g. `pkg.Outer.Inner`.
    pub full_name: String,
    pub simple_name: String,
    /// Declaration order is preserved.
    pub fields: Vec<FieldDescriptor>,
    pub nested_messages: Vec<MessageDescriptor>,
    pub nested_enums: Vec<EnumDescriptor>,
}

impl MessageDescriptor {
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let simple_name = simple_name_of(&full_name).to_string();
        Self {
            full_name,
            simple_name,
            fields: Vec::new(),
            nested_messages: Vec::new(),
            nested_enums: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<FieldDescriptor>) -> Self {
        self.fields = fields;
        self
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.number == number)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// An enum type: number → name, ordered by number.
#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    pub full_name: String,
    pub simple_name: String,
    pub values: BTreeMap<i64, String>,
}

impl EnumDescriptor {
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let simple_name = simple_name_of(&full_name).to_string();
        Self {
            full_name,
            simple_name,
            values: BTreeMap::new(),
        }
    }

    pub fn with_values<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (i64, String)>,
    {
        self.values = values.into_iter().collect();
        self
    }

    pub fn name_of(&self, number: i64) -> Option<&str> {
        self.values.get(&number).map(String::as_str)
    }

    pub fn number_of(&self, name: &str) -> Option<i64> {
        self.values
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(num, _)| *num)
    }
}

/// One RPC method of a service.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    /// Dotted input/output message type names.
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

/// A service with its methods.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub full_name: String,
    pub simple_name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let simple_name = simple_name_of(&full_name).to_string();
        Self {
            full_name,
            simple_name,
            methods: Vec::new(),
        }
    }
}

/// One `.proto` file's declarations.
#[derive(Debug, Clone, Default)]
pub struct FileDescriptor {
    pub file_name: String,
    pub package: String,
    /// File names this file imports.
    pub dependencies: Vec<String>,
    pub messages: Vec<MessageDescriptor>,
    pub enums: Vec<EnumDescriptor>,
    pub services: Vec<ServiceDescriptor>,
}

impl FileDescriptor {
    pub fn new(file_name: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            package: package.into(),
            ..Default::default()
        }
    }
}

/// Last dotted segment of a full name.
pub fn simple_name_of(full_name: &str) -> &str {
    full_name.rsplit('.').next().unwrap_or(full_name)
}

/// Join a package/parent prefix with a simple name.
pub fn qualify(prefix: &str, simple: &str) -> String {
    if prefix.is_empty() {
        simple.to_string()
    } else {
        format!("{}.{}", prefix, simple)
    }
}

/// Strip the fully-qualified leading dot from a dotted type name.
pub fn normalize_type_name(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}
