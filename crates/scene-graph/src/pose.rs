use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::time::TimeStamp;

/// Rigid transform as a row-major homogeneous 4x4 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    m: [[f64; 4]; 4],
}

impl Pose {
    pub fn identity() -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { m }
    }

    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        let mut pose = Self::identity();
        pose.m[0][3] = x;
        pose.m[1][3] = y;
        pose.m[2][3] = z;
        pose
    }

    /// Builds a pose from a rotation (row-major 3x3) and a translation.
    pub fn from_parts(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        let mut pose = Self::identity();
        for r in 0..3 {
            pose.m[r][..3].copy_from_slice(&rotation[r]);
            pose.m[r][3] = translation[r];
        }
        pose
    }

    pub fn from_rows(m: [[f64; 4]; 4]) -> Self {
        Self { m }
    }

    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.m
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.m[0][3], self.m[1][3], self.m[2][3]]
    }

    /// `self * other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Pose) -> Pose {
        let mut m = [[0.0; 4]; 4];
        for (r, row) in m.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.m[r][k] * other.m[k][c]).sum();
            }
        }
        Pose { m }
    }

    /// Inverse of a rigid transform: `[Rᵀ | -Rᵀt]`.
    pub fn inverse(&self) -> Pose {
        let mut inv = Pose::identity();
        for r in 0..3 {
            for c in 0..3 {
                inv.m[r][c] = self.m[c][r];
            }
        }
        let t = self.translation();
        for r in 0..3 {
            inv.m[r][3] = -(0..3).map(|k| inv.m[r][k] * t[k]).sum::<f64>();
        }
        inv
    }

    pub fn approx_eq(&self, other: &Pose, tolerance: f64) -> bool {
        self.m
            .iter()
            .flatten()
            .zip(other.m.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    pub(crate) fn hash_bytes(&self) -> Vec<u8> {
        self.m
            .iter()
            .flatten()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

#[derive(Serialize, Deserialize)]
struct WirePose {
    #[serde(rename = "type")]
    kind: String,
    matrix: [[f64; 4]; 4],
    #[serde(default = "default_unit")]
    unit: String,
}

fn default_unit() -> String {
    "m".to_string()
}

impl Serialize for Pose {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WirePose {
            kind: "HomogeneousMatrix44".to_string(),
            matrix: self.m,
            unit: default_unit(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Pose {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WirePose::deserialize(deserializer)?;
        if wire.kind != "HomogeneousMatrix44" {
            return Err(serde::de::Error::custom(format!(
                "unsupported transform type '{}'",
                wire.kind
            )));
        }
        Ok(Pose { m: wire.matrix })
    }
}

/// 6x6 covariance (x, y, z, roll, pitch, yaw) attached to uncertain poses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Covariance {
    #[serde(rename = "covariance")]
    m: [[f64; 6]; 6],
}

impl Covariance {
    pub fn diagonal(values: [f64; 6]) -> Self {
        let mut m = [[0.0; 6]; 6];
        for (i, value) in values.into_iter().enumerate() {
            m[i][i] = value;
        }
        Self { m }
    }

    pub fn rows(&self) -> &[[f64; 6]; 6] {
        &self.m
    }

    pub(crate) fn hash_bytes(&self) -> Vec<u8> {
        self.m
            .iter()
            .flatten()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }
}

/// One entry of a pose history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub stamp: TimeStamp,
    pub transform: Pose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<Covariance>,
}

/// Time ordered pose samples, bounded by a retention window behind the newest one.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseHistory {
    samples: Vec<PoseSample>,
    retention_ms: f64,
}

impl PoseHistory {
    pub fn new(retention_ms: f64) -> Self {
        Self {
            samples: Vec::new(),
            retention_ms,
        }
    }

    pub fn latest_stamp(&self) -> Option<TimeStamp> {
        self.samples.last().map(|s| s.stamp)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[PoseSample] {
        &self.samples
    }

    /// Appends a sample. Callers guarantee it is newer than the latest one.
    pub(crate) fn push(&mut self, sample: PoseSample) {
        debug_assert!(self.latest_stamp().map_or(true, |latest| sample.stamp > latest));
        let horizon = sample.stamp.saturating_sub_millis(self.retention_ms);
        self.samples.push(sample);
        let keep_from = self
            .samples
            .iter()
            .position(|s| s.stamp >= horizon)
            .unwrap_or(self.samples.len() - 1);
        self.samples.drain(..keep_from);
    }

    /// The sample with the latest stamp not after `stamp`.
    pub fn at(&self, stamp: TimeStamp) -> Option<&PoseSample> {
        let idx = self.samples.partition_point(|s| s.stamp <= stamp);
        idx.checked_sub(1).map(|i| &self.samples[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ms: f64, x: f64) -> PoseSample {
        PoseSample {
            stamp: TimeStamp::from_millis(ms),
            transform: Pose::from_translation(x, 0.0, 0.0),
            uncertainty: None,
        }
    }

    #[test]
    fn compose_and_inverse_cancel() {
        let rotation = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let pose = Pose::from_parts(rotation, [1.0, 2.0, 3.0]);
        let round = pose.compose(&pose.inverse());
        assert!(round.approx_eq(&Pose::identity(), 1e-12));
    }

    #[test]
    fn translations_accumulate() {
        let a = Pose::from_translation(1.0, 2.0, 3.0);
        let b = Pose::from_translation(4.0, 5.0, 6.0);
        assert_eq!(a.compose(&b).translation(), [5.0, 7.0, 9.0]);
    }

    #[test]
    fn lookup_returns_latest_not_after() {
        let mut history = PoseHistory::new(10_000.0);
        history.push(sample(1.0, 1.0));
        history.push(sample(5.0, 5.0));
        assert!(history.at(TimeStamp::from_millis(0.5)).is_none());
        assert_eq!(history.at(TimeStamp::from_millis(1.0)).unwrap().transform.translation()[0], 1.0);
        assert_eq!(history.at(TimeStamp::from_millis(4.9)).unwrap().transform.translation()[0], 1.0);
        assert_eq!(history.at(TimeStamp::from_millis(99.0)).unwrap().transform.translation()[0], 5.0);
    }

    #[test]
    fn retention_drops_old_samples_but_keeps_newest() {
        let mut history = PoseHistory::new(10.0);
        history.push(sample(1.0, 1.0));
        history.push(sample(5.0, 5.0));
        history.push(sample(30.0, 30.0));
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest_stamp(), Some(TimeStamp::from_millis(30.0)));
    }

    #[test]
    fn wire_form_is_tagged_matrix() {
        let pose = Pose::from_translation(1.0, 2.0, 3.0);
        let value = serde_json::to_value(pose).unwrap();
        assert_eq!(value["type"], "HomogeneousMatrix44");
        assert_eq!(value["matrix"][0][3], 1.0);
        let back: Pose = serde_json::from_value(value).unwrap();
        assert_eq!(back, pose);
    }
}
