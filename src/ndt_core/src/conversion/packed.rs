//! Packed `x, y, z, intensity` records in the `sensor_msgs/PointCloud2`
//! layout.

use nalgebra::SVector;

use super::points::IntensityPoint;
use crate::error::{CloudFormatError, Result};
use crate::grid::{
    index::bundle_size, Bundle, CellData, GridConfig, Gridmap, InverseModel, NdtGrid,
    OccupancyData,
};

/// `PointField` datatype code for 32-bit floats.
pub const FLOAT32: u8 = 7;

/// Bytes per record: four FLOAT32 values.
pub const POINT_STEP: u32 = 16;

const FIELD_NAMES: [&str; 4] = ["x", "y", "z", "intensity"];

/// Description of one field inside a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

/// Unordered cloud of packed records.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedCloud {
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    pub data: Vec<u8>,
    pub is_dense: bool,
}

impl Default for PackedCloud {
    fn default() -> Self {
        Self::from_records(&[])
    }
}

impl PackedCloud {
    pub fn from_records(records: &[[f32; 4]]) -> Self {
        let fields = FIELD_NAMES
            .iter()
            .zip(0u32..)
            .map(|(name, i)| PointField {
                name: (*name).to_string(),
                offset: 4 * i,
                datatype: FLOAT32,
                count: 1,
            })
            .collect();

        let mut data = Vec::with_capacity(records.len() * POINT_STEP as usize);
        for record in records {
            for value in record {
                data.extend_from_slice(&value.to_le_bytes());
            }
        }

        let width = records.len() as u32;
        Self {
            height: 1,
            width,
            fields,
            is_bigendian: false,
            point_step: POINT_STEP,
            row_step: POINT_STEP * width,
            data,
            is_dense: false,
        }
    }

    pub fn len(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse the records back, checking the layout first.
    pub fn records(&self) -> Result<Vec<[f32; 4]>, CloudFormatError> {
        if self.is_bigendian {
            return Err(CloudFormatError::BigEndian);
        }
        if self.point_step != POINT_STEP {
            return Err(CloudFormatError::PointStep(self.point_step));
        }
        for (name, i) in FIELD_NAMES.iter().zip(0u32..) {
            let field = self
                .fields
                .iter()
                .find(|f| f.name == *name)
                .ok_or(CloudFormatError::MissingField(name))?;
            if field.offset != 4 * i {
                return Err(CloudFormatError::FieldOffset {
                    name,
                    expected: 4 * i,
                    found: field.offset,
                });
            }
            if field.datatype != FLOAT32 || field.count != 1 {
                return Err(CloudFormatError::FieldType(name));
            }
        }

        let expected = self.len() * POINT_STEP as usize;
        if self.data.len() < expected {
            return Err(CloudFormatError::DataLength {
                expected,
                found: self.data.len(),
            });
        }

        Ok(self.data[..expected]
            .chunks_exact(POINT_STEP as usize)
            .map(|chunk| std::array::from_fn(|k| read_f32(chunk, 4 * k)))
            .collect())
    }

    /// Records as [`IntensityPoint`]s.
    pub fn points(&self) -> Result<Vec<IntensityPoint>, CloudFormatError> {
        Ok(self
            .records()?
            .into_iter()
            .map(|[x, y, z, intensity]| IntensityPoint { x, y, z, intensity })
            .collect())
    }
}

/// Read a little-endian f32 at `offset`.
fn read_f32(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Build a plain grid from the positions of packed records.
///
/// The first `D` coordinates of every record are inserted; the intensity is
/// ignored. Fails on an invalid `config` or a malformed cloud.
pub fn gridmap_from_packed<const D: usize>(
    cloud: &PackedCloud,
    config: GridConfig<D>,
) -> Result<Gridmap<D>> {
    let mut grid = Gridmap::new(config)?;
    for record in cloud.records()? {
        let point = SVector::<f64, D>::from_fn(|k, _| f64::from(record[k]));
        grid.insert(&point);
    }
    Ok(grid)
}

/// Average over all `2^D` slots of `weight(cell) · cell density at mean`.
fn bundle_value<C, F, const D: usize>(
    bundle: &Bundle<'_, C, D>,
    mean: &SVector<f64, D>,
    weight: F,
) -> f64
where
    C: CellData<D>,
    F: Fn(&C) -> f64,
{
    let total: f64 = bundle
        .slots()
        .flatten()
        .map(|cell| cell.distribution().sample_non_normalized(mean) * weight(cell))
        .sum();
    total / bundle_size(D) as f64
}

/// Pack every non-empty bundle.
///
/// Partially allocated bundles are materialized first so the export covers
/// every bundle that shares a cell with the data.
pub fn to_packed<C: CellData<D>, const D: usize>(grid: &mut NdtGrid<C, D>) -> PackedCloud {
    grid.allocate_partially_allocated_bundles();

    let mut records = Vec::with_capacity(grid.bundle_count());
    grid.traverse(|_, bundle| {
        if let Some(mean) = bundle.combined_distribution().mean() {
            let value = bundle_value(&bundle, &mean, |_| 1.0);
            records.push(IntensityPoint::from_position(&mean, value).to_record());
        }
    });
    PackedCloud::from_records(&records)
}

/// Like [`to_packed`], keeping bundles whose combined occupancy is strictly
/// above `threshold` and weighting every cell by its own occupancy.
pub fn occupancy_to_packed<C, M, const D: usize>(
    grid: &mut NdtGrid<C, D>,
    model: &M,
    threshold: f64,
) -> PackedCloud
where
    C: OccupancyData<D>,
    M: InverseModel + ?Sized,
{
    grid.allocate_partially_allocated_bundles();

    let mut records = Vec::new();
    grid.traverse(|_, bundle| {
        if bundle.combined_occupancy(model) <= threshold {
            return;
        }
        if let Some(mean) = bundle.combined_distribution().mean() {
            let value = bundle_value(&bundle, &mean, |cell| cell.occupancy(model));
            records.push(IntensityPoint::from_position(&mean, value).to_record());
        }
    });
    PackedCloud::from_records(&records)
}
