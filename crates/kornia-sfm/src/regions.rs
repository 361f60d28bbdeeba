use std::collections::BTreeMap;
use std::path::PathBuf;

use glam::DVec2;

use crate::describer::{DescriberType, DescriptorMetric};
use crate::scene::{FeatureId, ViewId};

/// Error types for region sets. Any of them means the regions are invalid.
#[derive(Debug, thiserror::Error)]
pub enum RegionsError {
    /// Failed to read or write a region file.
    #[error("Failed to access region file {path}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A feature line could not be parsed.
    #[error("Failed to parse {path} at line {line}: {message}")]
    Parse {
        /// Path of the file.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Failed to decode a descriptor file.
    #[error("Failed to decode descriptors from {path}")]
    Decode {
        /// Path of the file.
        path: PathBuf,
        /// Underlying decoding error.
        #[source]
        source: bincode::error::DecodeError,
    },

    /// Failed to encode a descriptor file.
    #[error("Failed to encode descriptors")]
    Encode(#[from] bincode::error::EncodeError),

    /// The number of descriptors differs from the number of features.
    #[error("Got {descriptors} descriptors for {features} features")]
    CountMismatch {
        /// Number of features.
        features: usize,
        /// Number of descriptors.
        descriptors: usize,
    },

    /// The descriptor storage does not match the metric of the describer type.
    #[error("Descriptors of view {view_id} are not compatible with describer type {describer}")]
    IncompatibleDescriptors {
        /// The view the descriptors belong to.
        view_id: ViewId,
        /// The describer type requested.
        describer: DescriberType,
    },
}

/// A scale and orientation aware keypoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    /// Horizontal pixel coordinate.
    pub x: f32,
    /// Vertical pixel coordinate.
    pub y: f32,
    /// Detection scale.
    pub scale: f32,
    /// Orientation in radians.
    pub orientation: f32,
}

impl Feature {
    /// Create a feature at a pixel location with unit scale and no orientation.
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            scale: 1.0,
            orientation: 0.0,
        }
    }

    /// The pixel coordinates in double precision.
    #[inline]
    pub fn coords(&self) -> DVec2 {
        DVec2::new(self.x as f64, self.y as f64)
    }
}

/// Descriptor storage for a region set, laid out row-major.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub enum Descriptors {
    /// Quantized descriptors, e.g. SIFT.
    U8 {
        /// Number of components per descriptor.
        dim: u32,
        /// Descriptor data.
        data: Vec<u8>,
    },
    /// Floating point descriptors.
    F32 {
        /// Number of components per descriptor.
        dim: u32,
        /// Descriptor data.
        data: Vec<f32>,
    },
    /// Packed binary descriptors compared with the Hamming distance.
    Binary {
        /// Number of bytes per descriptor.
        bytes: u32,
        /// Descriptor data.
        data: Vec<u8>,
    },
}

impl Descriptors {
    /// Number of components (or bytes) of a single descriptor.
    pub fn dimension(&self) -> usize {
        match self {
            Descriptors::U8 { dim, .. } | Descriptors::F32 { dim, .. } => *dim as usize,
            Descriptors::Binary { bytes, .. } => *bytes as usize,
        }
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        let dim = self.dimension();
        if dim == 0 {
            return 0;
        }
        match self {
            Descriptors::U8 { data, .. } | Descriptors::Binary { data, .. } => data.len() / dim,
            Descriptors::F32 { data, .. } => data.len() / dim,
        }
    }

    /// Whether there are no descriptors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The metric used to compare these descriptors.
    pub fn metric(&self) -> DescriptorMetric {
        match self {
            Descriptors::Binary { .. } => DescriptorMetric::Hamming,
            _ => DescriptorMetric::L2,
        }
    }
}

/// The features and descriptors extracted from one view for one describer type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Regions {
    features: Vec<Feature>,
    descriptors: Option<Descriptors>,
}

impl Regions {
    /// Create a region set, checking that there is one descriptor per feature.
    pub fn new(features: Vec<Feature>, descriptors: Descriptors) -> Result<Self, RegionsError> {
        if descriptors.len() != features.len() {
            return Err(RegionsError::CountMismatch {
                features: features.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(Self {
            features,
            descriptors: Some(descriptors),
        })
    }

    /// Create a region set that only holds keypoints.
    pub fn from_features(features: Vec<Feature>) -> Self {
        Self {
            features,
            descriptors: None,
        }
    }

    /// The keypoints.
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// A keypoint by index.
    pub fn feature(&self, feature_id: FeatureId) -> Option<&Feature> {
        self.features.get(feature_id as usize)
    }

    /// The descriptors, if they have not been released.
    pub fn descriptors(&self) -> Option<&Descriptors> {
        self.descriptors.as_ref()
    }

    /// Number of keypoints.
    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the region set has no keypoints.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Release the descriptors, keeping the keypoints.
    pub fn clear_descriptors(&mut self) {
        self.descriptors = None;
    }
}

/// Region sets of all the views, per describer type.
#[derive(Debug, Clone, Default)]
pub struct RegionsPerView {
    regions: BTreeMap<ViewId, BTreeMap<DescriberType, Regions>>,
}

impl RegionsPerView {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the region set of a view for a describer type, replacing any previous one.
    pub fn insert(&mut self, view_id: ViewId, describer: DescriberType, regions: Regions) {
        self.regions
            .entry(view_id)
            .or_default()
            .insert(describer, regions);
    }

    /// The region set of a view for a describer type.
    pub fn get(&self, view_id: ViewId, describer: DescriberType) -> Option<&Regions> {
        self.regions.get(&view_id)?.get(&describer)
    }

    /// The pixel coordinates of a feature.
    pub fn feature_coords(
        &self,
        view_id: ViewId,
        describer: DescriberType,
        feature_id: FeatureId,
    ) -> Option<DVec2> {
        self.get(view_id, describer)?
            .feature(feature_id)
            .map(Feature::coords)
    }

    /// The views that have at least one region set.
    pub fn view_ids(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.regions.keys().copied()
    }

    /// Number of views with regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether no view has regions.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Release every descriptor; only the keypoints are needed after matching.
    pub fn clear_descriptors(&mut self) {
        self.regions
            .values_mut()
            .flat_map(|per_type| per_type.values_mut())
            .for_each(Regions::clear_descriptors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_count_mismatch() {
        let features = vec![Feature::new(1.0, 2.0), Feature::new(3.0, 4.0)];
        let descriptors = Descriptors::F32 {
            dim: 4,
            data: vec![0.0; 4],
        };
        assert!(matches!(
            Regions::new(features, descriptors),
            Err(RegionsError::CountMismatch {
                features: 2,
                descriptors: 1
            })
        ));
    }

    #[test]
    fn test_clear_descriptors_keeps_features() -> Result<(), RegionsError> {
        let regions = Regions::new(
            vec![Feature::new(1.0, 2.0)],
            Descriptors::Binary {
                bytes: 2,
                data: vec![0xff, 0x0f],
            },
        )?;
        let mut per_view = RegionsPerView::new();
        per_view.insert(3, DescriberType::AkazeMldb, regions);
        assert!(per_view
            .get(3, DescriberType::AkazeMldb)
            .and_then(Regions::descriptors)
            .is_some());

        per_view.clear_descriptors();
        let regions = per_view.get(3, DescriberType::AkazeMldb);
        assert!(regions.and_then(Regions::descriptors).is_none());
        assert_eq!(regions.map(Regions::len), Some(1));
        assert_eq!(
            per_view.feature_coords(3, DescriberType::AkazeMldb, 0),
            Some(DVec2::new(1.0, 2.0))
        );
        assert_eq!(per_view.feature_coords(3, DescriberType::Sift, 0), None);
        Ok(())
    }

    #[test]
    fn test_descriptor_len() {
        let d = Descriptors::U8 {
            dim: 128,
            data: vec![0; 128 * 3],
        };
        assert_eq!(d.len(), 3);
        assert_eq!(d.metric(), DescriptorMetric::L2);
    }
}
