// Re-export from idl_types so the rest of the generator has a single import path
pub use idl_types::{
    ArraySize, ArrayType, ByteOrder, CaseValue, ChannelDef, EnumMember, EnumType, IntegralType,
    MessageDef, PointerType, ProtocolFile, StructField, StructType, SwitchCase, SwitchType,
    TypeDef, TypeKind, TypeRefType,
};
