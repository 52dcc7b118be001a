//! Command/runner lifecycle status, mirroring `def.STATUS`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Status {
    NotStart = 0,
    Success = 1,
    Ongoing = 2,
    Pending = 3,
    Failure = 4,
    Cancel = 5,
    Interrupt = 6,
}

impl Status {
    pub fn is_completed(self) -> bool {
        matches!(self, Status::Success | Status::Failure | Status::Cancel)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::NotStart
    }
}
