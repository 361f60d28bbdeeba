use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::describer::DescriberType;
use crate::regions::{Descriptors, Feature, Regions, RegionsError, RegionsPerView};
use crate::scene::{Scene, ViewId};

/// Path of the keypoint file of a view: `<dir>/<view_id>.<describer>.feat`.
pub fn features_path(dir: impl AsRef<Path>, view_id: ViewId, describer: DescriberType) -> PathBuf {
    dir.as_ref().join(format!("{view_id}.{describer}.feat"))
}

/// Path of the descriptor file of a view: `<dir>/<view_id>.<describer>.desc`.
pub fn descriptors_path(
    dir: impl AsRef<Path>,
    view_id: ViewId,
    describer: DescriberType,
) -> PathBuf {
    dir.as_ref().join(format!("{view_id}.{describer}.desc"))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RegionsError + '_ {
    move |source| RegionsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read a keypoint file, one `x y scale orientation` line per feature.
pub fn load_features(path: impl AsRef<Path>) -> Result<Vec<Feature>, RegionsError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(io_error(path))?;
    let reader = BufReader::new(file);

    let mut features = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(io_error(path))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parse_error = |message: String| RegionsError::Parse {
            path: path.to_path_buf(),
            line: i + 1,
            message,
        };
        let values = trimmed
            .split_whitespace()
            .map(|v| v.parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| parse_error(e.to_string()))?;
        let &[x, y, scale, orientation] = values.as_slice() else {
            return Err(parse_error(format!(
                "expected 4 values per feature, got {}",
                values.len()
            )));
        };
        features.push(Feature {
            x,
            y,
            scale,
            orientation,
        });
    }
    Ok(features)
}

/// Write a keypoint file.
pub fn save_features(path: impl AsRef<Path>, features: &[Feature]) -> Result<(), RegionsError> {
    let path = path.as_ref();
    let file = std::fs::File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    for f in features {
        writeln!(writer, "{} {} {} {}", f.x, f.y, f.scale, f.orientation)
            .map_err(io_error(path))?;
    }
    writer.flush().map_err(io_error(path))
}

/// Read a descriptor file encoded with `bincode`.
pub fn load_descriptors(path: impl AsRef<Path>) -> Result<Descriptors, RegionsError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(io_error(path))?;
    let (descriptors, _): (Descriptors, usize) =
        bincode::decode_from_slice(&bytes, bincode::config::standard()).map_err(|source| {
            RegionsError::Decode {
                path: path.to_path_buf(),
                source,
            }
        })?;
    Ok(descriptors)
}

/// Write a descriptor file encoded with `bincode`.
pub fn save_descriptors(
    path: impl AsRef<Path>,
    descriptors: &Descriptors,
) -> Result<(), RegionsError> {
    let path = path.as_ref();
    let bytes = bincode::encode_to_vec(descriptors, bincode::config::standard())?;
    std::fs::write(path, bytes).map_err(io_error(path))
}

/// Read the keypoints and descriptors of a view for a describer type.
///
/// The descriptor storage must use the metric of the describer type.
pub fn load_regions(
    dir: impl AsRef<Path>,
    view_id: ViewId,
    describer: DescriberType,
) -> Result<Regions, RegionsError> {
    let dir = dir.as_ref();
    let features = load_features(features_path(dir, view_id, describer))?;
    let descriptors = load_descriptors(descriptors_path(dir, view_id, describer))?;
    if descriptors.metric() != describer.metric() {
        return Err(RegionsError::IncompatibleDescriptors {
            view_id,
            describer,
        });
    }
    Regions::new(features, descriptors)
}

/// Write the keypoints and descriptors of a view for a describer type.
pub fn save_regions(
    dir: impl AsRef<Path>,
    view_id: ViewId,
    describer: DescriberType,
    regions: &Regions,
) -> Result<(), RegionsError> {
    let dir = dir.as_ref();
    save_features(features_path(dir, view_id, describer), regions.features())?;
    if let Some(descriptors) = regions.descriptors() {
        save_descriptors(descriptors_path(dir, view_id, describer), descriptors)?;
    }
    Ok(())
}

/// Read the regions of every view of the scene, for every describer type, in parallel.
///
/// Fails if any of them cannot be read.
pub fn load_regions_per_view(
    scene: &Scene,
    dir: impl AsRef<Path>,
    describers: &[DescriberType],
) -> Result<RegionsPerView, RegionsError> {
    let dir = dir.as_ref();
    let jobs = scene
        .views
        .keys()
        .flat_map(|&view_id| describers.iter().map(move |&d| (view_id, d)))
        .collect::<Vec<_>>();

    let loaded = jobs
        .par_iter()
        .map(|&(view_id, describer)| {
            load_regions(dir, view_id, describer).map(|regions| (view_id, describer, regions))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut regions_per_view = RegionsPerView::new();
    for (view_id, describer, regions) in loaded {
        regions_per_view.insert(view_id, describer, regions);
    }
    log::info!(
        "loaded regions of {} views for {} describer types",
        regions_per_view.len(),
        describers.len()
    );
    Ok(regions_per_view)
}
