//! Read planning: the schema × subunit-count cross product, cut into
//! contiguous same-type batches

use crate::registers::{DataType, RegisterTemplate, SubunitKind, SystemShape};

/// One register the engine polls
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRegister {
    pub template: &'static RegisterTemplate,
    pub index: u8,
    pub address: u16,
    pub sensor_id: String,
}

impl PlannedRegister {
    pub fn word_count(&self) -> u16 {
        self.template.data_type.word_count()
    }
}

/// A contiguous run read with one request
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub start: u16,
    pub count: u16,
    pub data_type: DataType,
    /// Indices into [`ReadPlan::registers`]
    pub entries: Vec<usize>,
}

impl Batch {
    /// Failure-counter key
    pub fn key(&self) -> (u16, u16) {
        (self.start, self.count)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadPlan {
    pub registers: Vec<PlannedRegister>,
    pub batches: Vec<Batch>,
}

impl ReadPlan {
    /// Collect every template readable on this site and cut batches
    pub fn build(shape: &SystemShape, max_batch_size: u16) -> Self {
        let mut registers = Vec::new();
        let kinds = std::iter::once(SubunitKind::Main).chain(SubunitKind::SUBUNITS);
        for kind in kinds {
            for index in 1..=shape.count(kind) {
                for template in kind.templates() {
                    // Firmware-gated and disabled registers are skipped silently
                    let Ok(address) = shape.check_template(template, index) else {
                        continue;
                    };
                    registers.push(PlannedRegister {
                        template,
                        index,
                        address,
                        sensor_id: kind.sensor_id(index, template.name),
                    });
                }
            }
        }
        registers.sort_by_key(|r| r.address);
        let batches = cut_batches(&registers, max_batch_size.max(1));
        Self { registers, batches }
    }

    pub fn batch_entries<'a>(&'a self, batch: &'a Batch) -> impl Iterator<Item = &'a PlannedRegister> + 'a {
        batch.entries.iter().map(move |i| &self.registers[*i])
    }

    pub fn find(&self, sensor_id: &str) -> Option<&PlannedRegister> {
        self.registers.iter().find(|r| r.sensor_id == sensor_id)
    }
}

fn cut_batches(registers: &[PlannedRegister], max_batch_size: u16) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Option<Batch> = None;

    for (i, reg) in registers.iter().enumerate() {
        let data_type = reg.template.data_type;
        if data_type == DataType::Int32 {
            if let Some(b) = current.take() {
                batches.push(b);
            }
            batches.push(Batch {
                start: reg.address,
                count: 2,
                data_type,
                entries: vec![i],
            });
            continue;
        }

        if let Some(b) = current.as_mut()
            && reg.address == b.start + b.count
            && b.data_type == data_type
            && b.count < max_batch_size
        {
            b.count += 1;
            b.entries.push(i);
            continue;
        }

        if let Some(b) = current.take() {
            batches.push(b);
        }
        current = Some(Batch {
            start: reg.address,
            count: 1,
            data_type,
            entries: vec![i],
        });
    }
    if let Some(b) = current {
        batches.push(b);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_pairs_are_atomic_batches() {
        let shape = SystemShape::default();
        let plan = ReadPlan::build(&shape, 120);
        let b = plan.batches.iter().find(|b| b.start == 1020).unwrap();
        assert_eq!(b.count, 2);
        assert_eq!(b.entries.len(), 1);
        assert_eq!(b.data_type, DataType::Int32);
        // Nothing else claims 1021
        assert!(plan.registers.iter().all(|r| r.address != 1021));
    }

    #[test]
    fn test_runs_split_on_type_and_gaps() {
        let plan = ReadPlan::build(&SystemShape::default(), 120);
        for b in &plan.batches {
            let regs: Vec<_> = plan.batch_entries(b).collect();
            for pair in regs.windows(2) {
                assert_eq!(pair[1].address, pair[0].address + 1);
                assert_eq!(pair[0].template.data_type, pair[1].template.data_type);
            }
            assert_eq!(regs[0].address, b.start);
        }
        // hp1 4..9 are int16 and contiguous
        let b = plan.batches.iter().find(|b| b.start == 1004).unwrap();
        assert_eq!(b.count, 6);
    }

    #[test]
    fn test_batch_size_cap() {
        let plan = ReadPlan::build(&SystemShape::default(), 2);
        assert!(plan.batches.iter().all(|b| b.count <= 2));
    }

    #[test]
    fn test_shape_filters_registers() {
        let mut shape = SystemShape {
            num_hc: 2,
            firmware: 2,
            ..Default::default()
        };
        shape.disabled_registers.insert(1004);
        let plan = ReadPlan::build(&shape, 120);
        assert!(plan.find("hp1_flow_line_temperature").is_none());
        assert!(plan.find("hc1_target_temp_flow_line").is_none());
        assert_eq!(plan.find("hc2_room_device_temperature").unwrap().address, 5104);
        assert!(plan.find("hp2_flow_line_temperature").is_none());
        assert_eq!(plan.find("ambient_temperature").unwrap().address, 2);
        let addrs: Vec<u16> = plan.registers.iter().map(|r| r.address).collect();
        let mut sorted = addrs.clone();
        sorted.sort();
        assert_eq!(addrs, sorted);
    }
}
