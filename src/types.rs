/// Rank of a participating node (0-indexed).
pub type Rank = u32;

/// Identifier of a transfer issued through a [`Cluster`](crate::Cluster).
///
/// Ids are unique per cluster handle and increase monotonically.
pub type TransferId = u64;

/// Element types understood by the reduction codec.
///
/// Values travel in host byte order: a cluster is expected to be
/// homogeneous in endianness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    F32 = 4,
    F64 = 5,
    /// Four packed `f32` lanes; arithmetic is applied lane-wise.
    F32x4 = 6,
}

impl DataType {
    /// Every supported element type, in tag order.
    pub const ALL: [DataType; 7] = [
        DataType::I8,
        DataType::I16,
        DataType::I32,
        DataType::I64,
        DataType::F32,
        DataType::F64,
        DataType::F32x4,
    ];

    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::I8 => 1,
            DataType::I16 => 2,
            DataType::I32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 => 8,
            DataType::F32x4 => 16,
        }
    }

    /// Number of scalar lanes in one element.
    pub const fn lanes(self) -> usize {
        match self {
            DataType::F32x4 => 4,
            _ => 1,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::I8 => "i8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::F32x4 => "f32x4",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator applied when incoming data is folded into a destination buffer.
///
/// `dest[i] = dest[i] OP incoming[i]`; [`ReduceOp::None`] overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReduceOp {
    /// Plain receive: incoming bytes replace the destination.
    #[default]
    None,
    Add,
    Sub,
    Mul,
    Div,
}

impl ReduceOp {
    /// Every operator, `None` first.
    pub const ALL: [ReduceOp; 5] = [
        ReduceOp::None,
        ReduceOp::Add,
        ReduceOp::Sub,
        ReduceOp::Mul,
        ReduceOp::Div,
    ];
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::None => f.write_str("none"),
            ReduceOp::Add => f.write_str("add"),
            ReduceOp::Sub => f.write_str("sub"),
            ReduceOp::Mul => f.write_str("mul"),
            ReduceOp::Div => f.write_str("div"),
        }
    }
}
