//! Read / write float arrays as raw binary, little-endian f32.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::image::{Image, ImageGeometry};

pub fn write(data: impl Iterator<Item = f32>, path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut buf = BufWriter::new(file);
    for datum in data {
        buf.write_all(&datum.to_le_bytes())?;
    }
    Ok(())
}

type IORes<T> = std::io::Result<T>;
pub fn read<'a>(path: &Path) -> IORes<impl Iterator<Item = IORes<f32>> + 'a> {
    let file = File::open(path)?;
    let mut buf = BufReader::new(file);
    let mut buffer = [0; 4];

    Ok(std::iter::from_fn(move || {
        use std::io::ErrorKind::UnexpectedEof;
        match buf.read_exact(&mut buffer) {
            Ok(()) => Some(Ok(f32::from_le_bytes(buffer))),
            Err(e) if e.kind() == UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }))
}

pub fn write_image(image: &Image, path: &Path) -> std::io::Result<()> {
    write(image.data.iter().copied(), path)
}

/// Read a voxel image written by `write_image`. The file must contain
/// exactly the number of voxels the geometry prescribes.
pub fn read_image(geometry: ImageGeometry, path: &Path) -> Result<Image, Box<dyn std::error::Error>> {
    let data: Vec<f32> = read(path)?.collect::<Result<_, _>>()?;
    if data.len() != geometry.n_voxels() {
        return Err(format!(
            "{}: found {} voxels, geometry needs {}",
            path.display(),
            data.len(),
            geometry.n_voxels()
        )
        .into());
    }
    Ok(Image::new(geometry, data))
}
