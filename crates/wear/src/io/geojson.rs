use std::path::Path;

use geojson::{Feature, FeatureCollection, Geometry, Value};

use crate::{
    error::Result,
    types::{AlignedContourPair, Contour},
};

fn contour_feature(id: usize, role: &str, contour: &Contour) -> Feature {
    let mut ring: Vec<Vec<f64>> = contour.points().iter().map(|p| vec![p.x, p.y]).collect();
    if let Some(first) = ring.first().cloned() {
        ring.push(first);
    }
    let geometry = Geometry::new(Value::Polygon(vec![ring]));

    let mut properties = serde_json::Map::new();
    properties.insert("role".to_string(), serde_json::Value::from(role));
    properties.insert("point_count".to_string(), serde_json::Value::from(contour.len()));
    properties.insert("area_px".to_string(), serde_json::Value::from(contour.area()));
    properties.insert(
        "perimeter_px".to_string(),
        serde_json::Value::from(contour.perimeter()),
    );

    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: Some(geojson::feature::Id::Number(serde_json::Number::from(id))),
        properties: Some(properties),
        foreign_members: None,
    }
}

impl AlignedContourPair {
    /// Healthy and worn outlines as closed polygons, with the fitted
    /// transform in the collection's foreign members.
    pub fn to_geojson(&self) -> Result<FeatureCollection> {
        let features = vec![
            contour_feature(0, "healthy", &self.healthy),
            contour_feature(1, "worn", &self.worn),
        ];

        let mut foreign_members = serde_json::Map::new();
        foreign_members.insert("transform".to_string(), serde_json::to_value(self.transform)?);
        foreign_members.insert("iterations".to_string(), serde_json::Value::from(self.iterations));
        foreign_members.insert(
            "rms_error_px".to_string(),
            serde_json::Value::from(self.rms_error_px),
        );

        Ok(FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(foreign_members),
        })
    }

    /// Export to GeoJSON and serialize to JSON string
    pub fn to_geojson_string(&self) -> Result<String> {
        let geojson = self.to_geojson()?;
        Ok(serde_json::to_string_pretty(&geojson)?)
    }

    pub fn save_geojson(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_geojson_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RigidTransform;
    use nalgebra::Point2;

    fn pair() -> AlignedContourPair {
        let square = |side: f64| {
            Contour::new(vec![
                Point2::new(0.0, 0.0),
                Point2::new(side, 0.0),
                Point2::new(side, side),
                Point2::new(0.0, side),
            ])
            .expect("valid square")
        };
        AlignedContourPair {
            worn: square(9.0),
            healthy: square(10.0),
            transform: RigidTransform::from_translation(1.5, -2.0),
            iterations: 4,
            rms_error_px: 0.25,
        }
    }

    #[test]
    fn rings_are_closed_and_tagged() {
        let collection = pair().to_geojson().expect("geojson");
        assert_eq!(collection.features.len(), 2);
        let Some(Geometry {
            value: Value::Polygon(rings),
            ..
        }) = &collection.features[1].geometry
        else {
            panic!("worn feature is not a polygon");
        };
        assert_eq!(rings[0].len(), 5);
        assert_eq!(rings[0].first(), rings[0].last());
        let role = collection.features[1]
            .properties
            .as_ref()
            .and_then(|p| p.get("role"))
            .and_then(|r| r.as_str());
        assert_eq!(role, Some("worn"));
    }

    #[test]
    fn saved_file_parses_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pair.geojson");
        pair().save_geojson(&path).expect("saved");
        let text = std::fs::read_to_string(&path).expect("read back");
        let parsed: FeatureCollection = text.parse().expect("valid geojson");
        let members = parsed.foreign_members.expect("metadata");
        assert_eq!(members["iterations"], serde_json::json!(4));
        assert_eq!(members["transform"]["translation"], serde_json::json!([1.5, -2.0]));
    }
}
