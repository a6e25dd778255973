use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum IntegralType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    U16Be,
    U32Be,
    U64Be,
    I16Be,
    I32Be,
    I64Be,
}

impl IntegralType {
    /// Encoded width in bytes.
    pub fn width(self) -> u64 {
        match self {
            IntegralType::U8 | IntegralType::I8 => 1,
            IntegralType::U16 | IntegralType::I16 | IntegralType::U16Be | IntegralType::I16Be => 2,
            IntegralType::U32 | IntegralType::I32 | IntegralType::U32Be | IntegralType::I32Be => 4,
            IntegralType::U64 | IntegralType::I64 | IntegralType::U64Be | IntegralType::I64Be => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntegralType::I8
                | IntegralType::I16
                | IntegralType::I32
                | IntegralType::I64
                | IntegralType::I16Be
                | IntegralType::I32Be
                | IntegralType::I64Be
        )
    }

    pub fn byte_order(self) -> ByteOrder {
        match self {
            IntegralType::U16Be
            | IntegralType::U32Be
            | IntegralType::U64Be
            | IntegralType::I16Be
            | IntegralType::I32Be
            | IntegralType::I64Be => ByteOrder::Big,
            _ => ByteOrder::Little,
        }
    }

    /// Largest value representable by this type, viewed as unsigned bits.
    pub fn max_unsigned(self) -> u64 {
        match self.width() {
            8 => u64::MAX,
            width => (1u64 << (width * 8)) - 1,
        }
    }

    /// Name of the matching Rust primitive (byte order is not part of it).
    pub fn rust_name(self) -> &'static str {
        match self {
            IntegralType::U8 => "u8",
            IntegralType::U16 | IntegralType::U16Be => "u16",
            IntegralType::U32 | IntegralType::U32Be => "u32",
            IntegralType::U64 | IntegralType::U64Be => "u64",
            IntegralType::I8 => "i8",
            IntegralType::I16 | IntegralType::I16Be => "i16",
            IntegralType::I32 | IntegralType::I32Be => "i32",
            IntegralType::I64 | IntegralType::I64Be => "i64",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct TypeRefType {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct StructField {
    pub name: String,
    pub field_type: TypeKind,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct StructType {
    #[serde(default)]
    pub fields: Vec<StructField>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct EnumMember {
    pub name: String,
    /// Explicit value; unvalued members are numbered from their predecessor.
    #[serde(default)]
    pub value: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct EnumType {
    pub base: IntegralType,
    pub members: Vec<EnumMember>,
    /// Bit-flag set: any combination of member bits is a valid value.
    #[serde(default)]
    pub flags: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

/// A case label: either a literal or a member name of the discriminant's enum.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(untagged)]
pub enum CaseValue {
    Number(u64),
    Name(String),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct SwitchCase {
    pub name: String,
    #[serde(default)]
    pub values: Vec<CaseValue>,
    /// Arm payload; absent for an empty arm.
    #[serde(default)]
    pub arm_type: Option<TypeKind>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct SwitchType {
    /// Sibling field holding the discriminant; must precede the switch field.
    pub discriminant: String,
    pub cases: Vec<SwitchCase>,
    #[serde(default)]
    pub default: Option<Box<SwitchCase>>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum ArraySize {
    Literal(u64),
    Field(String),
    Remaining,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ArrayType {
    pub size: ArraySize,
    pub element_type: Box<TypeKind>,
}

fn default_offset_type() -> IntegralType {
    IntegralType::U32
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct PointerType {
    #[serde(default = "default_offset_type")]
    pub offset_type: IntegralType,
    /// Named struct the offset points at.
    pub target: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum TypeKind {
    Primitive(IntegralType),
    TypeRef(TypeRefType),
    Struct(StructType),
    Enum(EnumType),
    Switch(SwitchType),
    Array(ArrayType),
    Pointer(PointerType),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct MessageDef {
    pub name: String,
    #[serde(default)]
    pub value: Option<u64>,
    /// Named struct used as the body; mutually exclusive with `fields`.
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub fields: Vec<StructField>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelDef {
    pub name: String,
    #[serde(default)]
    pub value: Option<u64>,
    /// Name used when prefixing message symbols of this channel.
    #[serde(default)]
    pub member_name: Option<String>,
    /// Channel whose messages this channel inherits.
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub server_messages: Vec<MessageDef>,
    #[serde(default)]
    pub client_messages: Vec<MessageDef>,
}

/// Root of an interface description file.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ProtocolFile {
    pub name: String,
    #[serde(default, with = "serde_yml::with::singleton_map_recursive")]
    pub types: Vec<TypeDef>,
    #[serde(default, with = "serde_yml::with::singleton_map_recursive")]
    pub channels: Vec<ChannelDef>,
}

impl ProtocolFile {
    pub fn from_yaml(source: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(source)
    }
}
