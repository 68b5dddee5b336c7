//! Pose and kernel-collection records.
//!
//! Poses persist as `(loc: [x, y, z], ori: [w, x, y, z], loc_h, ori_h,
//! weight)`; collections as arrays of kernel records. Both are plain JSON
//! so aligned models and best transforms can be inspected and fed back in
//! without a dedicated reader stack.

use std::fs;
use std::path::Path;

use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::collection::KernelCollection;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::estimator::PoseHypothesis;
use crate::geometry::SE3;
use crate::kernel::{Kernel, Point};

/// Serialized pose: location, scalar-first quaternion, bandwidths, weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseRecord {
    pub loc: [f64; 3],
    pub ori: [f64; 4],
    pub loc_h: f64,
    pub ori_h: f64,
    pub weight: f64,
}

impl From<&PoseHypothesis> for PoseRecord {
    fn from(h: &PoseHypothesis) -> Self {
        let t = h.pose.translation;
        let q = h.pose.rotation;
        Self {
            loc: [t.x, t.y, t.z],
            ori: [q.w, q.i, q.j, q.k],
            loc_h: h.loc_h,
            ori_h: h.ori_h,
            weight: h.weight,
        }
    }
}

impl PoseRecord {
    pub fn to_hypothesis(&self) -> PoseHypothesis {
        let pose = SE3::from_quaternion(
            self.ori[0],
            self.ori[1],
            self.ori[2],
            self.ori[3],
            Vector3::new(self.loc[0], self.loc[1], self.loc[2]),
        );
        PoseHypothesis {
            pose,
            weight: self.weight,
            loc_h: self.loc_h,
            ori_h: self.ori_h,
        }
    }
}

pub fn write_pose(path: &Path, hypothesis: &PoseHypothesis) -> Result<()> {
    let record = PoseRecord::from(hypothesis);
    fs::write(path, serde_json::to_string_pretty(&record)?)?;
    Ok(())
}

pub fn read_pose(path: &Path) -> Result<PoseHypothesis> {
    let record: PoseRecord = serde_json::from_str(&fs::read_to_string(path)?)?;
    Ok(record.to_hypothesis())
}

/// One serialized kernel. `kind` selects the manifold; the unused
/// components stay absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelRecord {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ori: Option<[f64; 4]>,
    pub weight: f64,
    pub loc_h: f64,
    pub ori_h: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<[f64; 3]>,
}

impl From<&Kernel> for KernelRecord {
    fn from(k: &Kernel) -> Self {
        let loc = k.location().map(|l| [l.x, l.y, l.z]);
        let dir = k.direction().map(|d| [d.x, d.y, d.z]);
        let ori = k.orientation().map(|q| [q.w, q.i, q.j, q.k]);
        Self {
            kind: k.manifold().to_string(),
            loc,
            dir,
            ori,
            weight: k.weight,
            loc_h: k.loc_h,
            ori_h: k.ori_h,
            color: k.color,
        }
    }
}

impl KernelRecord {
    pub fn to_kernel(&self) -> Result<Kernel> {
        let bad = |what: &str| Error::Record(format!("{} record missing {what}", self.kind));
        let loc = || {
            self.loc
                .map(|l| Vector3::new(l[0], l[1], l[2]))
                .ok_or_else(|| bad("loc"))
        };
        let dir = || {
            self.dir
                .map(|d| Unit::new_normalize(Vector3::new(d[0], d[1], d[2])))
                .ok_or_else(|| bad("dir"))
        };
        let ori = || {
            self.ori
                .map(|o| {
                    UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
                        o[0], o[1], o[2], o[3],
                    ))
                })
                .ok_or_else(|| bad("ori"))
        };

        let point = match self.kind.as_str() {
            "r3" => Point::R3(loc()?),
            "r3xs2" => Point::R3xS2 {
                loc: loc()?,
                dir: dir()?,
            },
            "r3xs2p" => Point::R3xS2P {
                loc: loc()?,
                dir: dir()?,
            },
            "se3" => Point::Se3(SE3::from_parts(ori()?, loc()?)),
            "so3" => Point::So3(ori()?),
            other => return Err(Error::Record(format!("unknown kernel kind `{other}`"))),
        };

        Ok(Kernel {
            point,
            weight: self.weight,
            loc_h: self.loc_h,
            ori_h: self.ori_h,
            color: self.color,
        })
    }
}

/// Write a collection as a JSON array of kernel records.
pub fn write_collection(path: &Path, collection: &KernelCollection) -> Result<()> {
    let records: Vec<KernelRecord> = collection.iter().map(KernelRecord::from).collect();
    fs::write(path, serde_json::to_string(&records)?)?;
    Ok(())
}

/// Read a collection written by [`write_collection`].
pub fn read_collection(path: &Path, config: &Config) -> Result<KernelCollection> {
    let records: Vec<KernelRecord> = serde_json::from_str(&fs::read_to_string(path)?)?;
    let mut collection = KernelCollection::with_config(config.clone());
    for r in &records {
        collection.add(r.to_kernel()?)?;
    }
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pose_record_roundtrip() {
        let pose = SE3::from_parts(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.8),
            Vector3::new(1.0, -2.0, 0.5),
        );
        let h = PoseHypothesis {
            pose,
            weight: 0.42,
            loc_h: 0.05,
            ori_h: 0.1,
        };
        let record = PoseRecord::from(&h);
        assert_eq!(record.ori[0], pose.rotation.w);
        let back = record.to_hypothesis();
        assert_relative_eq!(back.pose.translation, pose.translation, epsilon = 1e-12);
        assert!(back.pose.rotation.coords.dot(&pose.rotation.coords).abs() > 1.0 - 1e-12);
        assert_eq!(back.weight, 0.42);
    }

    #[test]
    fn test_kernel_record_roundtrip() {
        let dir = Unit::new_normalize(Vector3::new(0.0, 1.0, 1.0));
        let mut k = Kernel::r3xs2p(Vector3::new(1.0, 2.0, 3.0), dir)
            .with_weight(0.7)
            .with_bandwidths(0.1, 0.2);
        k.color = Some([0.0, 0.0, 1.0]);
        let record = KernelRecord::from(&k);
        assert_eq!(record.kind, "r3xs2p");
        let back = record.to_kernel().unwrap();
        assert_eq!(back.manifold(), k.manifold());
        assert_relative_eq!(
            back.direction().unwrap().into_inner(),
            dir.into_inner(),
            epsilon = 1e-12
        );
        assert_eq!(back.color, Some([0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let record = KernelRecord {
            kind: "r4".into(),
            loc: Some([0.0; 3]),
            dir: None,
            ori: None,
            weight: 1.0,
            loc_h: 0.0,
            ori_h: 0.0,
            color: None,
        };
        assert!(record.to_kernel().is_err());
    }
}
