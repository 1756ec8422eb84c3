use std::fmt;

/// Runtime element type tag carried by every buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// IEEE 754 half precision (via the `half` crate).
    Half,
    /// Brain floating point: f32 exponent range with a 7-bit mantissa.
    BFloat16,
    Float,
    Double,
    /// Variable-length strings packed as offset header + payload.
    Utf8,
    /// Opaque compressed payload; never materialized by this crate.
    Compressed,
    Unknown,
}

impl ElementType {
    /// Every fixed-width numeric element type, in flat-tag order.
    pub const NUMERIC: [ElementType; 13] = [
        ElementType::Bool,
        ElementType::Half,
        ElementType::Float,
        ElementType::Double,
        ElementType::Int8,
        ElementType::Int16,
        ElementType::Int32,
        ElementType::Int64,
        ElementType::UInt8,
        ElementType::UInt16,
        ElementType::UInt32,
        ElementType::UInt64,
        ElementType::BFloat16,
    ];

    /// Returns the size in bytes of a single element.
    ///
    /// Variable-width (`Utf8`) and opaque (`Compressed`, `Unknown`) types
    /// report 0.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ElementType::Bool | ElementType::Int8 | ElementType::UInt8 => 1,
            ElementType::Int16 | ElementType::UInt16 => 2,
            ElementType::Half | ElementType::BFloat16 => 2,
            ElementType::Int32 | ElementType::UInt32 | ElementType::Float => 4,
            ElementType::Int64 | ElementType::UInt64 | ElementType::Double => 8,
            ElementType::Utf8 | ElementType::Compressed | ElementType::Unknown => 0,
        }
    }

    /// Returns true if elements of this type have a fixed byte width.
    pub fn is_fixed_width(&self) -> bool {
        self.size_in_bytes() > 0
    }

    /// Returns true for the variable-length string type.
    pub fn is_variable_width(&self) -> bool {
        matches!(self, ElementType::Utf8)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ElementType::Int8
                | ElementType::Int16
                | ElementType::Int32
                | ElementType::Int64
                | ElementType::UInt8
                | ElementType::UInt16
                | ElementType::UInt32
                | ElementType::UInt64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            ElementType::Half | ElementType::BFloat16 | ElementType::Float | ElementType::Double
        )
    }

    pub fn is_signed(&self) -> bool {
        self.is_float()
            || matches!(
                self,
                ElementType::Int8 | ElementType::Int16 | ElementType::Int32 | ElementType::Int64
            )
    }

    /// Converts a flat-graph dtype tag to an `ElementType`.
    ///
    /// Tags follow the graph schema numbering: BOOL=1, HALF=3, FLOAT=5,
    /// DOUBLE=6, INT8..INT64=7..10, UINT8..UINT64=11..14, BFLOAT16=17, UTF8=50.
    pub fn from_flat_tag(tag: u8) -> Option<ElementType> {
        match tag {
            1 => Some(ElementType::Bool),
            3 => Some(ElementType::Half),
            5 => Some(ElementType::Float),
            6 => Some(ElementType::Double),
            7 => Some(ElementType::Int8),
            8 => Some(ElementType::Int16),
            9 => Some(ElementType::Int32),
            10 => Some(ElementType::Int64),
            11 => Some(ElementType::UInt8),
            12 => Some(ElementType::UInt16),
            13 => Some(ElementType::UInt32),
            14 => Some(ElementType::UInt64),
            17 => Some(ElementType::BFloat16),
            50 => Some(ElementType::Utf8),
            _ => None,
        }
    }

    /// Returns the flat-graph dtype tag, or `None` for types the graph schema
    /// cannot carry.
    pub fn to_flat_tag(&self) -> Option<u8> {
        match self {
            ElementType::Bool => Some(1),
            ElementType::Half => Some(3),
            ElementType::Float => Some(5),
            ElementType::Double => Some(6),
            ElementType::Int8 => Some(7),
            ElementType::Int16 => Some(8),
            ElementType::Int32 => Some(9),
            ElementType::Int64 => Some(10),
            ElementType::UInt8 => Some(11),
            ElementType::UInt16 => Some(12),
            ElementType::UInt32 => Some(13),
            ElementType::UInt64 => Some(14),
            ElementType::BFloat16 => Some(17),
            ElementType::Utf8 => Some(50),
            ElementType::Compressed | ElementType::Unknown => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Bool => "bool",
            ElementType::Int8 => "int8",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::UInt8 => "uint8",
            ElementType::UInt16 => "uint16",
            ElementType::UInt32 => "uint32",
            ElementType::UInt64 => "uint64",
            ElementType::Half => "half",
            ElementType::BFloat16 => "bfloat16",
            ElementType::Float => "float",
            ElementType::Double => "double",
            ElementType::Utf8 => "utf8",
            ElementType::Compressed => "compressed",
            ElementType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}
