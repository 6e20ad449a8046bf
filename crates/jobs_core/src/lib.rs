//! Jobs core: pure data model, run state machine and fingerprint index.
mod index;
mod record;
mod run;
mod urls;

pub use index::{FingerprintIndex, IndexEntry};
pub use record::{
    CanonicalRecord, EmploymentType, Location, RawFields, RawRecord, SalaryInfo, SalaryPeriod,
    Seniority,
};
pub use run::{
    AdmittedFingerprint, ErrorKind, RunId, RunRecord, RunState, SiteCounts, StageError,
    StageTransition, TransitionError,
};
pub use urls::{normalize_url, UrlPolicy};
