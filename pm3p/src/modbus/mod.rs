use serde::Serialize;

pub mod connection;
pub mod register;

pub type UnitId = tokio_modbus::prelude::SlaveId;
pub type Unit = tokio_modbus::prelude::Slave;

/// One phase of the meter. Each phase answers on its own slave address on the shared bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Phase {
    L1,
    L2,
    L3,
}

impl Phase {
    /// Polling order.
    pub const ALL: [Phase; 3] = [Phase::L1, Phase::L2, Phase::L3];

    pub fn unit(&self) -> Unit {
        let id: UnitId = match self {
            Phase::L1 => 1,
            Phase::L2 => 2,
            Phase::L3 => 3,
        };
        tokio_modbus::slave::Slave(id)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::L1 => "L1",
            Phase::L2 => "L2",
            Phase::L3 => "L3",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[test]
fn phases_map_to_fixed_units() {
    let units: Vec<UnitId> = Phase::ALL.iter().map(|p| p.unit().0).collect();
    assert_eq!(units, vec![1, 2, 3]);
}

#[test]
fn phase_names_sort_like_their_order() {
    let mut names: Vec<&str> = Phase::ALL.iter().map(Phase::name).collect();
    names.sort();
    assert_eq!(names, vec!["L1", "L2", "L3"]);
    assert_eq!(serde_json::to_value(Phase::L2).unwrap(), "L2");
}
