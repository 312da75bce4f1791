//! 🫐欢迎光临🫐
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, LabelVolume, NiftiGeom, ScanVolume, VolumePair};

pub use crate::config::SubjectLayout;
pub use crate::consts::{labels, ATLAS_CLASSES, BIOBANK_5K_CLASSES, DEFAULT_MAX_REFERENCES};

pub use crate::metrics::{class_metrics, dice, surface_distances, ClassMapping, MetricVector};

pub use crate::registration::{ElastixEngine, RefPipeline, RegistrationEngine, StageSpec};

pub use crate::dataset::{self, load_subject, scan_atlas_store, SubjectOverrides};

pub use crate::rca::{RcaSweep, ResultTable, SweepOptions};
