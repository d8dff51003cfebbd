//! Attribute schema shared by the builder and the on-disk meta trailer.

/// Version of the library that wrote the index, stored in the file header.
pub const LIB_VERSION: u32 = 1;

/// Version of the on-disk layout itself.
pub const STORAGE_VERSION: u32 = 1;

/// Source attribute types accepted by the builder.
///
/// Seven source types collapse to three storage widths: `Uint32`,
/// `Timestamp` and `Uint32Set` are collected as `u32`; `Float` as `f32`
/// (bit-preserved into `u32` on disk); `Int64`, `Int64Set` and `String`
/// (hashed) as 64-bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AttrType {
    Uint32 = 0,
    Timestamp = 1,
    Float = 2,
    Int64 = 3,
    String = 4,
    Uint32Set = 5,
    Int64Set = 6,
}

impl AttrType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Uint32),
            1 => Some(Self::Timestamp),
            2 => Some(Self::Float),
            3 => Some(Self::Int64),
            4 => Some(Self::String),
            5 => Some(Self::Uint32Set),
            6 => Some(Self::Int64Set),
            _ => None,
        }
    }

    /// Set types expand their element arrays into one pair per element.
    pub fn is_set(self) -> bool {
        matches!(self, Self::Uint32Set | Self::Int64Set)
    }
}

/// One attribute of the source table, as passed to `Builder::new`.
#[derive(Debug, Clone)]
pub struct SourceAttr {
    /// Position of the attribute in the host engine's row layout.
    pub src_index: usize,
    pub name: String,
    pub attr_type: AttrType,
}

impl SourceAttr {
    pub fn new(src_index: usize, name: impl Into<String>, attr_type: AttrType) -> Self {
        Self {
            src_index,
            name: name.into(),
            attr_type,
        }
    }
}

/// Schema entry recorded in the meta trailer: the source position plus the
/// dense index of the attribute within this file.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub src_attr: usize,
    pub attr: usize,
    pub attr_type: AttrType,
}
