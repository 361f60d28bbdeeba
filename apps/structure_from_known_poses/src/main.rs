use argh::FromArgs;
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use kornia_sfm::describer::{describer_types_to_string, parse_describer_types};
use kornia_sfm::io::features::load_regions_per_view;
use kornia_sfm::io::matches::{load_matches, GeometricModel};
use kornia_sfm::io::scene::{
    load_scene, point_cloud_companion_path, save_scene, SceneFormat, SceneParts,
};
use kornia_sfm::pipeline::{PairSource, StructureConfig, StructureEstimator};

#[derive(FromArgs)]
/// Compute the structure of a scene whose camera poses are known
struct Args {
    /// path to the input scene (.json or .sfm)
    #[argh(option, short = 'i')]
    input: PathBuf,

    /// directory containing the features and descriptors of the views
    #[argh(option, short = 'f')]
    features_directory: PathBuf,

    /// path to the output scene (.json, .sfm or .ply)
    #[argh(option, short = 'o')]
    output: PathBuf,

    /// comma separated describer types, e.g. sift,akaze
    #[argh(option, short = 'd', default = "String::from(\"sift\")")]
    describer_types: String,

    /// directory containing putative matches; pairs come from frustum intersections if absent
    #[argh(option, short = 'm')]
    matches_directory: Option<PathBuf>,

    /// geometric model tag of the match files: f, e or h
    #[argh(option, short = 'g', default = "GeometricModel::Fundamental")]
    matches_geometric_model: GeometricModel,

    /// use the provided matches instead of matching the descriptors again
    #[argh(switch)]
    reuse_matches: bool,

    /// JSON file overriding the estimation parameters
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// log level: fatal, error, warning, info, debug or trace
    #[argh(
        option,
        short = 'v',
        default = "LevelFilter::Info",
        from_str_fn(parse_verbose_level)
    )]
    verbose_level: LevelFilter,
}

fn parse_verbose_level(value: &str) -> Result<LevelFilter, String> {
    match value.to_ascii_lowercase().as_str() {
        "fatal" | "error" => Ok(LevelFilter::Error),
        "warning" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        other => Err(format!("unknown verbose level: {other}")),
    }
}

/// The matches directory, if one is given. An empty path selects frustum pairing.
fn matches_directory(dir: Option<&Path>) -> Option<&Path> {
    dir.filter(|dir| !dir.as_os_str().is_empty())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Args = argh::from_env();
    env_logger::Builder::new()
        .filter_level(args.verbose_level)
        .init();

    let output_format = SceneFormat::from_path(&args.output)?;
    let describers = parse_describer_types(&args.describer_types)?;
    let config = match &args.config {
        Some(path) => StructureConfig::from_json_file(path)?,
        None => StructureConfig::default(),
    };
    config.validate()?;

    let mut scene = load_scene(&args.input, SceneParts::CAMERAS)?;
    log::info!(
        "{} views, {} with intrinsics and pose",
        scene.views.len(),
        scene.valid_views().len()
    );

    let regions = load_regions_per_view(&scene, &args.features_directory, &describers)?;

    let source = match matches_directory(args.matches_directory.as_deref()) {
        Some(dir) => PairSource::Matches {
            matches: load_matches(
                dir,
                &scene.view_ids(),
                &describers,
                args.matches_geometric_model,
            )?,
            reuse: args.reuse_matches,
        },
        None => PairSource::Frustum,
    };

    log::info!(
        "estimating structure with {}",
        describer_types_to_string(&describers)
    );
    let (landmarks, mut report) =
        StructureEstimator::new(&scene, regions, &describers, config)?.run(source)?;
    scene.set_landmarks(landmarks);

    let start = Instant::now();
    if output_format != SceneFormat::PointCloud {
        save_scene(
            &scene,
            point_cloud_companion_path(&args.output),
            SceneParts::ALL,
        )?;
    }
    save_scene(&scene, &args.output, SceneParts::ALL)?;
    report.mark_saved(start.elapsed());

    log::info!(
        "{} pairs, {} of {} correspondences kept, {} tracks",
        report.num_pairs,
        report
            .filter
            .triplet_inliers
            .unwrap_or(report.filter.epipolar_inliers),
        report.filter.putative,
        report.triangulation.tracks
    );
    for (stage, duration) in &report.durations {
        log::info!("  {stage}: {duration:?}");
    }
    println!(
        "Structure estimation took {:?}: #{} landmarks ({} degenerate tracks, {} outliers removed)",
        report.elapsed(),
        report.num_landmarks,
        report.triangulation.degenerate,
        report.outliers_removed
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_directory() {
        assert_eq!(matches_directory(None), None);
        assert_eq!(matches_directory(Some(Path::new(""))), None);
        assert_eq!(
            matches_directory(Some(Path::new("matches"))),
            Some(Path::new("matches"))
        );
    }
}
