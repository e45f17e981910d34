//! HEALPix grid-mapping marker for remapped stores.

use std::sync::Arc;

use serde_json::json;
use zarrs_filesystem::FilesystemStore;

use crate::config::CompressionConfig;
use crate::error::{RemapError, Result};
use crate::store::{declare_array, ArrayHandle, ArraySpec, DIMENSIONS_ATTR};

/// Name of the grid-mapping array.
pub const CRS_NAME: &str = "crs";

/// Highest zoom whose nside still fits the metadata integer.
pub const MAX_ZOOM: u32 = 29;

/// Attributes describing a nested HEALPix grid at `zoom`.
pub fn crs_attributes(zoom: u32) -> Result<serde_json::Map<String, serde_json::Value>> {
    if zoom > MAX_ZOOM {
        return Err(RemapError::config(format!(
            "HEALPix zoom {zoom} exceeds maximum {MAX_ZOOM}"
        )));
    }
    let mut attributes = serde_json::Map::new();
    attributes.insert(DIMENSIONS_ATTR.to_string(), json!([CRS_NAME]));
    attributes.insert("grid_mapping_name".to_string(), json!("healpix"));
    attributes.insert("healpix_nside".to_string(), json!(1u64 << zoom));
    attributes.insert("healpix_order".to_string(), json!("nest"));
    Ok(attributes)
}

/// Declare the `crs` array in `store`, replacing any previous one.
pub fn attach_crs(store: &Arc<FilesystemStore>, zoom: u32) -> Result<ArrayHandle> {
    let mut spec =
        ArraySpec::float32(CRS_NAME, vec![1], vec![1]).with_dims(&[CRS_NAME.to_string()]);
    spec.attributes = crs_attributes(zoom)?;
    declare_array(store, &spec, &CompressionConfig::none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{array_info, create_store};

    #[test]
    fn test_crs_attributes() {
        let attrs = crs_attributes(7).unwrap();
        assert_eq!(attrs["healpix_nside"], json!(128));
        assert_eq!(attrs["healpix_order"], json!("nest"));
        assert!(crs_attributes(MAX_ZOOM + 1).is_err());
    }

    #[test]
    fn test_attach_crs() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = create_store(dir.path()).unwrap();
        let crs = attach_crs(&store, 10).expect("Failed to attach crs");
        let info = array_info(&crs).unwrap();
        assert_eq!(info.shape, vec![1]);
        assert_eq!(info.dims, vec!["crs"]);
        assert_eq!(info.attributes["healpix_nside"], json!(1024));
        assert_eq!(info.attributes["grid_mapping_name"], json!("healpix"));
    }
}
