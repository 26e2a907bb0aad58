use std::fmt;

/// Logical groups of session data that the parser can extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldGroup {
    /// Hook lines: source, destination and translated address/port
    Peers,
    Basics,
    States,
    Stats,
    Rate,
    Npu,
    NpuError,
    Policy,
    Other,
    Shaping,
    Macs,
    Interfaces,
    Auth,
    Custom,
    /// The raw record text
    Plain,
}

impl FieldGroup {
    pub const ALL: [FieldGroup; 15] = [
        FieldGroup::Peers,
        FieldGroup::Basics,
        FieldGroup::States,
        FieldGroup::Stats,
        FieldGroup::Rate,
        FieldGroup::Npu,
        FieldGroup::NpuError,
        FieldGroup::Policy,
        FieldGroup::Other,
        FieldGroup::Shaping,
        FieldGroup::Macs,
        FieldGroup::Interfaces,
        FieldGroup::Auth,
        FieldGroup::Custom,
        FieldGroup::Plain,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FieldGroup::Peers => "peers",
            FieldGroup::Basics => "basics",
            FieldGroup::States => "states",
            FieldGroup::Stats => "stats",
            FieldGroup::Rate => "rate",
            FieldGroup::Npu => "npu",
            FieldGroup::NpuError => "npu-error",
            FieldGroup::Policy => "policy",
            FieldGroup::Other => "other",
            FieldGroup::Shaping => "shaping",
            FieldGroup::Macs => "macs",
            FieldGroup::Interfaces => "interfaces",
            FieldGroup::Auth => "auth",
            FieldGroup::Custom => "custom",
            FieldGroup::Plain => "plain",
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// The set of field groups downstream consumers need.
///
/// Filter, template and plugins each add their requirements while they are
/// compiled. There is intentionally no way to clear a flag: a group that one
/// consumer needs must stay available to all of them.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldRequest {
    bits: u32,
}

impl FieldRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request every group
    pub fn all() -> Self {
        let mut request = Self::new();
        request.request_all();
        request
    }

    pub fn request(&mut self, group: FieldGroup) {
        self.bits |= group.bit();
    }

    pub fn request_many(&mut self, groups: &[FieldGroup]) {
        for group in groups {
            self.request(*group);
        }
    }

    pub fn request_all(&mut self) {
        self.request_many(&FieldGroup::ALL);
    }

    /// Union with the requirements of another consumer
    pub fn merge(&mut self, other: &FieldRequest) {
        self.bits |= other.bits;
    }

    pub fn contains(&self, group: FieldGroup) -> bool {
        self.bits & group.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn groups(&self) -> impl Iterator<Item = FieldGroup> + '_ {
        FieldGroup::ALL.into_iter().filter(|g| self.contains(*g))
    }
}

impl fmt::Debug for FieldRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.groups().map(|g| g.name()))
            .finish()
    }
}
