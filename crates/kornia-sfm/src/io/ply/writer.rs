use std::io::{BufWriter, Write};
use std::path::Path;

use super::{PlyError, PlyType};
use crate::pointcloud::PointCloud;

/// Write a point cloud as a binary little endian PLY file.
///
/// Vertices are stored as `double x y z` and `uchar red green blue`. Points without a color
/// are written white.
pub fn write_ply_binary(path: impl AsRef<Path>, pointcloud: &PointCloud) -> Result<(), PlyError> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "ply")?;
    writeln!(writer, "format binary_little_endian 1.0")?;
    writeln!(writer, "comment generated by kornia-sfm")?;
    writeln!(writer, "element vertex {}", pointcloud.len())?;
    for property in PlyType::XYZRgb.properties() {
        writeln!(
            writer,
            "property {} {}",
            property.data_type.name(),
            property.name
        )?;
    }
    writeln!(writer, "end_header")?;

    let colors = pointcloud.colors();
    for (i, point) in pointcloud.points().iter().enumerate() {
        for coordinate in point {
            writer.write_all(&coordinate.to_le_bytes())?;
        }
        let color = colors
            .and_then(|colors| colors.get(i))
            .copied()
            .unwrap_or([255, 255, 255]);
        writer.write_all(&color)?;
    }
    writer.flush()?;
    Ok(())
}
