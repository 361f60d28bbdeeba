use std::fmt;
use std::str::FromStr;

/// Error types for describer type parsing.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DescriberTypeError {
    /// The name does not correspond to any describer type.
    #[error("Unknown describer type: {0:?}")]
    Unknown(String),

    /// The list of describer types is empty.
    #[error("Empty describer type list")]
    Empty,
}

/// Identifier of the feature extraction method that produced a region set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DescriberType {
    /// SIFT with 8-bit descriptors.
    Sift,
    /// SIFT with floating point descriptors.
    SiftFloat,
    /// SIFT without orientation estimation.
    SiftUpright,
    /// Domain-size pooled SIFT.
    DspSift,
    /// AKAZE with SURF-like floating point descriptors.
    Akaze,
    /// AKAZE keypoints with LIOP descriptors.
    AkazeLiop,
    /// AKAZE with binary M-LDB descriptors.
    AkazeMldb,
    /// Concentric circles markers with 3 crowns.
    Cctag3,
    /// Concentric circles markers with 4 crowns.
    Cctag4,
    /// OpenCV SIFT implementation.
    SiftOcv,
    /// OpenCV AKAZE implementation.
    AkazeOcv,
    /// AprilTag family 16h5 markers.
    Tag16h5,
}

/// Distance metric used to compare descriptors of a describer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorMetric {
    /// Euclidean distance.
    L2,
    /// Number of differing bits.
    Hamming,
}

// name lookup for parsing, must list every variant with its `as_str` name
const DESCRIBER_TYPE_NAMES: [(DescriberType, &str); 12] = [
    (DescriberType::Sift, "sift"),
    (DescriberType::SiftFloat, "sift_float"),
    (DescriberType::SiftUpright, "sift_upright"),
    (DescriberType::DspSift, "dspsift"),
    (DescriberType::Akaze, "akaze"),
    (DescriberType::AkazeLiop, "akaze_liop"),
    (DescriberType::AkazeMldb, "akaze_mldb"),
    (DescriberType::Cctag3, "cctag3"),
    (DescriberType::Cctag4, "cctag4"),
    (DescriberType::SiftOcv, "sift_ocv"),
    (DescriberType::AkazeOcv, "akaze_ocv"),
    (DescriberType::Tag16h5, "tag16h5"),
];

impl DescriberType {
    /// All the describer types, in declaration order.
    pub fn all() -> impl Iterator<Item = DescriberType> {
        DESCRIBER_TYPE_NAMES.iter().map(|(t, _)| *t)
    }

    /// The canonical name of the describer type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriberType::Sift => "sift",
            DescriberType::SiftFloat => "sift_float",
            DescriberType::SiftUpright => "sift_upright",
            DescriberType::DspSift => "dspsift",
            DescriberType::Akaze => "akaze",
            DescriberType::AkazeLiop => "akaze_liop",
            DescriberType::AkazeMldb => "akaze_mldb",
            DescriberType::Cctag3 => "cctag3",
            DescriberType::Cctag4 => "cctag4",
            DescriberType::SiftOcv => "sift_ocv",
            DescriberType::AkazeOcv => "akaze_ocv",
            DescriberType::Tag16h5 => "tag16h5",
        }
    }

    /// The metric used to compare descriptors of this type.
    pub fn metric(&self) -> DescriptorMetric {
        match self {
            DescriberType::AkazeMldb => DescriptorMetric::Hamming,
            _ => DescriptorMetric::L2,
        }
    }
}

impl FromStr for DescriberType {
    type Err = DescriberTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        DESCRIBER_TYPE_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(t, _)| *t)
            .ok_or_else(|| DescriberTypeError::Unknown(s.to_string()))
    }
}

impl fmt::Display for DescriberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a comma separated list of describer types, e.g. `"sift,akaze"`.
///
/// Duplicates are removed while keeping the first occurrence order.
pub fn parse_describer_types(s: &str) -> Result<Vec<DescriberType>, DescriberTypeError> {
    let mut types = Vec::new();
    for name in s.split(',').filter(|n| !n.trim().is_empty()) {
        let t = name.parse::<DescriberType>()?;
        if !types.contains(&t) {
            types.push(t);
        }
    }
    if types.is_empty() {
        return Err(DescriberTypeError::Empty);
    }
    Ok(types)
}

/// Format a list of describer types as a comma separated string.
pub fn describer_types_to_string(types: &[DescriberType]) -> String {
    types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    // exhaustive so that a new variant must be listed here as well
    fn variant_index(t: DescriberType) -> usize {
        match t {
            DescriberType::Sift => 0,
            DescriberType::SiftFloat => 1,
            DescriberType::SiftUpright => 2,
            DescriberType::DspSift => 3,
            DescriberType::Akaze => 4,
            DescriberType::AkazeLiop => 5,
            DescriberType::AkazeMldb => 6,
            DescriberType::Cctag3 => 7,
            DescriberType::Cctag4 => 8,
            DescriberType::SiftOcv => 9,
            DescriberType::AkazeOcv => 10,
            DescriberType::Tag16h5 => 11,
        }
    }

    #[test]
    fn test_every_variant_round_trips() {
        let variants = [
            DescriberType::Sift,
            DescriberType::SiftFloat,
            DescriberType::SiftUpright,
            DescriberType::DspSift,
            DescriberType::Akaze,
            DescriberType::AkazeLiop,
            DescriberType::AkazeMldb,
            DescriberType::Cctag3,
            DescriberType::Cctag4,
            DescriberType::SiftOcv,
            DescriberType::AkazeOcv,
            DescriberType::Tag16h5,
        ];
        for (i, t) in variants.into_iter().enumerate() {
            assert_eq!(variant_index(t), i);
            assert_eq!(t.to_string().parse::<DescriberType>(), Ok(t));
            assert!(DescriberType::all().any(|other| other == t));
        }
        assert_eq!(DescriberType::all().count(), variants.len());
    }

    #[test]
    fn test_names_are_bijective() {
        for (t, name) in DESCRIBER_TYPE_NAMES {
            assert_eq!(t.as_str(), name);
        }
        for t in DescriberType::all() {
            assert_eq!(t.as_str().parse::<DescriberType>(), Ok(t));
        }
        let mut names = DESCRIBER_TYPE_NAMES.iter().map(|(_, n)| *n).collect::<Vec<_>>();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), DESCRIBER_TYPE_NAMES.len());
    }

    #[test]
    fn test_parse_list() -> Result<(), DescriberTypeError> {
        let types = parse_describer_types("sift, AKAZE,sift")?;
        assert_eq!(types, vec![DescriberType::Sift, DescriberType::Akaze]);
        assert_eq!(describer_types_to_string(&types), "sift,akaze");
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_describer_types("sift,surf"),
            Err(DescriberTypeError::Unknown("surf".to_string()))
        );
        assert_eq!(parse_describer_types(" , "), Err(DescriberTypeError::Empty));
    }

    #[test]
    fn test_metric() {
        assert_eq!(DescriberType::AkazeMldb.metric(), DescriptorMetric::Hamming);
        assert_eq!(DescriberType::Sift.metric(), DescriptorMetric::L2);
    }
}
