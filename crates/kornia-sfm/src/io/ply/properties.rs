use super::PlyError;

/// The vertex layouts the reader knows about.
#[derive(Debug, PartialEq, Clone)]
pub enum PlyType {
    /// `double x y z`, `uchar red green blue`, as written by [`super::write_ply_binary`].
    XYZRgb,
    /// `float x y z`, `uchar red green blue`, `float nx ny nz`.
    XYZRgbNormals,
    /// Any other list of scalar properties.
    Dynamic(Vec<PlyPropertyDefinition>),
}

/// A scalar vertex property declared in the header.
#[derive(Debug, PartialEq, Clone)]
pub struct PlyPropertyDefinition {
    /// Property name.
    pub name: String,
    /// Property type.
    pub data_type: PlyDataType,
}

/// Scalar types of the PLY format.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum PlyDataType {
    /// `float`
    Float32,
    /// `double`
    Float64,
    /// `char`
    Int8,
    /// `uchar`
    UInt8,
    /// `short`
    Int16,
    /// `ushort`
    UInt16,
    /// `int`
    Int32,
    /// `uint`
    UInt32,
}

impl PlyDataType {
    /// Size in bytes.
    pub fn size(&self) -> usize {
        match self {
            PlyDataType::Float32 | PlyDataType::Int32 | PlyDataType::UInt32 => 4,
            PlyDataType::Float64 => 8,
            PlyDataType::Int16 | PlyDataType::UInt16 => 2,
            PlyDataType::Int8 | PlyDataType::UInt8 => 1,
        }
    }

    /// Name used in the header.
    pub fn name(&self) -> &'static str {
        match self {
            PlyDataType::Float32 => "float",
            PlyDataType::Float64 => "double",
            PlyDataType::Int8 => "char",
            PlyDataType::UInt8 => "uchar",
            PlyDataType::Int16 => "short",
            PlyDataType::UInt16 => "ushort",
            PlyDataType::Int32 => "int",
            PlyDataType::UInt32 => "uint",
        }
    }
}

/// Access to the point attributes of a decoded vertex.
pub trait PlyPropertyTrait {
    /// The vertex position.
    fn to_point(&self) -> [f64; 3];
    /// The vertex color.
    fn to_color(&self) -> [u8; 3];
    /// The vertex normal.
    fn to_normal(&self) -> [f64; 3];
}

/// A vertex with a double precision position and a color.
#[derive(Debug, bincode::Decode)]
pub struct XYZRgbProperty {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
    /// Red channel.
    pub red: u8,
    /// Green channel.
    pub green: u8,
    /// Blue channel.
    pub blue: u8,
}

impl PlyPropertyTrait for XYZRgbProperty {
    fn to_point(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    fn to_color(&self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }

    fn to_normal(&self) -> [f64; 3] {
        [0.0; 3]
    }
}

/// A vertex with a single precision position, a color and a normal.
#[derive(Debug, bincode::Decode)]
pub struct XYZRgbNormalsProperty {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
    /// Red channel.
    pub red: u8,
    /// Green channel.
    pub green: u8,
    /// Blue channel.
    pub blue: u8,
    /// Normal X component.
    pub nx: f32,
    /// Normal Y component.
    pub ny: f32,
    /// Normal Z component.
    pub nz: f32,
}

impl PlyPropertyTrait for XYZRgbNormalsProperty {
    fn to_point(&self) -> [f64; 3] {
        [self.x as f64, self.y as f64, self.z as f64]
    }

    fn to_color(&self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }

    fn to_normal(&self) -> [f64; 3] {
        [self.nx as f64, self.ny as f64, self.nz as f64]
    }
}

/// Dynamic PLY property that can handle arbitrary schemas
#[derive(Debug)]
pub struct DynamicProperty {
    /// Property values in header order.
    pub properties: Vec<(String, DynamicPropertyValue)>,
}

/// A decoded scalar value.
#[derive(Debug, Clone, Copy)]
pub enum DynamicPropertyValue {
    /// `float`
    Float32(f32),
    /// `double`
    Float64(f64),
    /// `char`
    Int8(i8),
    /// `uchar`
    UInt8(u8),
    /// `short`
    Int16(i16),
    /// `ushort`
    UInt16(u16),
    /// `int`
    Int32(i32),
    /// `uint`
    UInt32(u32),
}

fn le_bytes<const N: usize>(buffer: &[u8], offset: usize) -> Result<[u8; N], PlyError> {
    buffer
        .get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| PlyError::UnsupportedProperty("truncated vertex".to_string()))
}

impl DynamicProperty {
    fn parse_from_buffer(buffer: &[u8], schema: &[PlyPropertyDefinition]) -> Result<Self, PlyError> {
        let mut properties = Vec::with_capacity(schema.len());
        let mut offset = 0;

        for prop_def in schema {
            let value = match prop_def.data_type {
                PlyDataType::Float32 => {
                    DynamicPropertyValue::Float32(f32::from_le_bytes(le_bytes(buffer, offset)?))
                }
                PlyDataType::Float64 => {
                    DynamicPropertyValue::Float64(f64::from_le_bytes(le_bytes(buffer, offset)?))
                }
                PlyDataType::Int8 => {
                    DynamicPropertyValue::Int8(i8::from_le_bytes(le_bytes(buffer, offset)?))
                }
                PlyDataType::UInt8 => {
                    DynamicPropertyValue::UInt8(u8::from_le_bytes(le_bytes(buffer, offset)?))
                }
                PlyDataType::Int16 => {
                    DynamicPropertyValue::Int16(i16::from_le_bytes(le_bytes(buffer, offset)?))
                }
                PlyDataType::UInt16 => {
                    DynamicPropertyValue::UInt16(u16::from_le_bytes(le_bytes(buffer, offset)?))
                }
                PlyDataType::Int32 => {
                    DynamicPropertyValue::Int32(i32::from_le_bytes(le_bytes(buffer, offset)?))
                }
                PlyDataType::UInt32 => {
                    DynamicPropertyValue::UInt32(u32::from_le_bytes(le_bytes(buffer, offset)?))
                }
            };

            properties.push((prop_def.name.clone(), value));
            offset += prop_def.data_type.size();
        }

        Ok(DynamicProperty { properties })
    }

    fn get_float(&self, name: &str) -> f64 {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| match v {
                DynamicPropertyValue::Float32(v) => *v as f64,
                DynamicPropertyValue::Float64(v) => *v,
                DynamicPropertyValue::Int8(v) => *v as f64,
                DynamicPropertyValue::UInt8(v) => *v as f64,
                DynamicPropertyValue::Int16(v) => *v as f64,
                DynamicPropertyValue::UInt16(v) => *v as f64,
                DynamicPropertyValue::Int32(v) => *v as f64,
                DynamicPropertyValue::UInt32(v) => *v as f64,
            })
            .unwrap_or(0.0)
    }

    fn get_u8(&self, name: &str) -> u8 {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| match v {
                DynamicPropertyValue::UInt8(v) => *v,
                DynamicPropertyValue::Int8(v) => *v as u8,
                DynamicPropertyValue::Float32(v) => (*v * 255.0) as u8,
                DynamicPropertyValue::Float64(v) => (*v * 255.0) as u8,
                _ => 0,
            })
            .unwrap_or(0)
    }
}

impl PlyPropertyTrait for DynamicProperty {
    fn to_point(&self) -> [f64; 3] {
        [self.get_float("x"), self.get_float("y"), self.get_float("z")]
    }

    fn to_color(&self) -> [u8; 3] {
        [self.get_u8("red"), self.get_u8("green"), self.get_u8("blue")]
    }

    fn to_normal(&self) -> [f64; 3] {
        [self.get_float("nx"), self.get_float("ny"), self.get_float("nz")]
    }
}

/// A decoded vertex.
pub enum PlyProperty {
    /// See [`PlyType::XYZRgb`].
    XYZRgb(XYZRgbProperty),
    /// See [`PlyType::XYZRgbNormals`].
    XYZRgbNormals(XYZRgbNormalsProperty),
    /// See [`PlyType::Dynamic`].
    Dynamic(DynamicProperty),
}

const XYZ_RGB_SCHEMA: [(&str, PlyDataType); 6] = [
    ("x", PlyDataType::Float64),
    ("y", PlyDataType::Float64),
    ("z", PlyDataType::Float64),
    ("red", PlyDataType::UInt8),
    ("green", PlyDataType::UInt8),
    ("blue", PlyDataType::UInt8),
];

const XYZ_RGB_NORMALS_SCHEMA: [(&str, PlyDataType); 9] = [
    ("x", PlyDataType::Float32),
    ("y", PlyDataType::Float32),
    ("z", PlyDataType::Float32),
    ("red", PlyDataType::UInt8),
    ("green", PlyDataType::UInt8),
    ("blue", PlyDataType::UInt8),
    ("nx", PlyDataType::Float32),
    ("ny", PlyDataType::Float32),
    ("nz", PlyDataType::Float32),
];

fn matches_schema(properties: &[PlyPropertyDefinition], schema: &[(&str, PlyDataType)]) -> bool {
    properties.len() == schema.len()
        && properties
            .iter()
            .zip(schema)
            .all(|(p, (name, data_type))| p.name == *name && p.data_type == *data_type)
}

impl PlyType {
    /// Decode one vertex from its raw bytes.
    pub fn deserialize(&self, buffer: &[u8]) -> Result<PlyProperty, PlyError> {
        match self {
            PlyType::XYZRgb => {
                let (property, _): (XYZRgbProperty, usize) =
                    bincode::decode_from_slice(buffer, bincode::config::standard())?;
                Ok(PlyProperty::XYZRgb(property))
            }
            PlyType::XYZRgbNormals => {
                let (property, _): (XYZRgbNormalsProperty, usize) =
                    bincode::decode_from_slice(buffer, bincode::config::standard())?;
                Ok(PlyProperty::XYZRgbNormals(property))
            }
            PlyType::Dynamic(ref schema) => {
                let dynamic_property = DynamicProperty::parse_from_buffer(buffer, schema)?;
                Ok(PlyProperty::Dynamic(dynamic_property))
            }
        }
    }

    /// Size in bytes of one vertex.
    pub fn size_of(&self) -> usize {
        match self {
            PlyType::XYZRgb => XYZ_RGB_SCHEMA.iter().map(|(_, t)| t.size()).sum(),
            PlyType::XYZRgbNormals => XYZ_RGB_NORMALS_SCHEMA.iter().map(|(_, t)| t.size()).sum(),
            PlyType::Dynamic(ref props) => props.iter().map(|p| p.data_type.size()).sum(),
        }
    }

    /// The property list of a known layout, in header order.
    pub fn properties(&self) -> Vec<PlyPropertyDefinition> {
        let schema: &[(&str, PlyDataType)] = match self {
            PlyType::XYZRgb => &XYZ_RGB_SCHEMA,
            PlyType::XYZRgbNormals => &XYZ_RGB_NORMALS_SCHEMA,
            PlyType::Dynamic(props) => return props.clone(),
        };
        schema
            .iter()
            .map(|(name, data_type)| PlyPropertyDefinition {
                name: name.to_string(),
                data_type: *data_type,
            })
            .collect()
    }

    /// Pick the layout matching a property list.
    pub fn detect_format(properties: &[PlyPropertyDefinition]) -> Self {
        if matches_schema(properties, &XYZ_RGB_SCHEMA) {
            return PlyType::XYZRgb;
        }
        if matches_schema(properties, &XYZ_RGB_NORMALS_SCHEMA) {
            return PlyType::XYZRgbNormals;
        }
        PlyType::Dynamic(properties.to_vec())
    }
}

impl PlyPropertyTrait for PlyProperty {
    fn to_point(&self) -> [f64; 3] {
        match self {
            PlyProperty::XYZRgb(property) => property.to_point(),
            PlyProperty::XYZRgbNormals(property) => property.to_point(),
            PlyProperty::Dynamic(property) => property.to_point(),
        }
    }

    fn to_color(&self) -> [u8; 3] {
        match self {
            PlyProperty::XYZRgb(property) => property.to_color(),
            PlyProperty::XYZRgbNormals(property) => property.to_color(),
            PlyProperty::Dynamic(property) => property.to_color(),
        }
    }

    fn to_normal(&self) -> [f64; 3] {
        match self {
            PlyProperty::XYZRgb(property) => property.to_normal(),
            PlyProperty::XYZRgbNormals(property) => property.to_normal(),
            PlyProperty::Dynamic(property) => property.to_normal(),
        }
    }
}
