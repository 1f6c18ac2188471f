use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Geometry payload carried by a geometric node.
///
/// The graph never interprets the shape. It only needs equality, a stable
/// fingerprint for content hashing and a serialized form for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@geometrytype")]
pub enum Geometry {
    #[serde(rename_all = "camelCase")]
    Box { size_x: f64, size_y: f64, size_z: f64 },
    Sphere { radius: f64 },
    Cylinder { radius: f64, height: f64 },
    Mesh {
        vertices: Vec<[f64; 3]>,
        triangles: Vec<[u32; 3]>,
    },
    PointCloud { points: Vec<[f64; 3]> },
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Box { .. } => "Box",
            Geometry::Sphere { .. } => "Sphere",
            Geometry::Cylinder { .. } => "Cylinder",
            Geometry::Mesh { .. } => "Mesh",
            Geometry::PointCloud { .. } => "PointCloud",
        }
    }

    /// One line summary used by logs and the dot export.
    pub fn describe(&self) -> String {
        match self {
            Geometry::Box {
                size_x,
                size_y,
                size_z,
            } => format!("Box {size_x} x {size_y} x {size_z}"),
            Geometry::Sphere { radius } => format!("Sphere r={radius}"),
            Geometry::Cylinder { radius, height } => format!("Cylinder r={radius} h={height}"),
            Geometry::Mesh { triangles, .. } => format!("Mesh with {} triangles", triangles.len()),
            Geometry::PointCloud { points } => format!("PointCloud with {} points", points.len()),
        }
    }

    /// Identity of the payload: a SHA-256 over its canonical serialized form.
    pub fn fingerprint(&self) -> [u8; 32] {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        Sha256::digest(canonical).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_wire_form() {
        let shape = Geometry::Box {
            size_x: 1.0,
            size_y: 2.0,
            size_z: 3.0,
        };
        let value = serde_json::to_value(&shape).unwrap();
        assert_eq!(
            value,
            json!({"@geometrytype": "Box", "sizeX": 1.0, "sizeY": 2.0, "sizeZ": 3.0})
        );
        let back: Geometry = serde_json::from_value(value).unwrap();
        assert_eq!(back, shape);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = Geometry::Sphere { radius: 4.0 };
        let b = Geometry::Sphere { radius: 4.0 };
        let c = Geometry::Sphere { radius: 5.0 };
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn describes_meshes_by_size() {
        let mesh = Geometry::Mesh {
            vertices: vec![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 3.0]],
            triangles: vec![[0, 1, 2]],
        };
        assert_eq!(mesh.describe(), "Mesh with 1 triangles");
        assert_eq!(mesh.type_name(), "Mesh");
    }
}
