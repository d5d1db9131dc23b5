//! Collection-scan and virtual-scan builders.

use crate::{
    build::{SlotRole, StageBuilder, StageOutputs, StageRequirements},
    env,
    error::{BuildError, InternalError},
    expr::Expr,
    logical::{CollectionScanNode, VirtualScanKind, VirtualScanNode},
    physical::{CollectionScanStage, Stage},
    value::Value,
};

impl StageBuilder<'_> {
    pub(crate) fn build_collection_scan(
        &mut self,
        scan: &CollectionScanNode,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if reqs.index_keys().is_some() {
            return Err(
                InternalError::build_invariant("collection scan cannot produce index keys").into(),
            );
        }
        if reqs.has(SlotRole::ResumeTimestamp) && !scan.track_latest_timestamp {
            return Err(InternalError::build_invariant(
                "resume timestamp requested from a scan that does not track it",
            )
            .into());
        }

        let result = self.slots.generate();
        let record_id = self.slots.generate();
        let latest_timestamp = scan
            .track_latest_timestamp
            .then(|| self.slots.generate());

        // A resume branch seeks past the externally recorded position
        // before emitting rows.
        let resume_from = if reqs.is_resume_branch() {
            self.env.slot(env::RESUME_RECORD_ID)
        } else {
            None
        };

        let mut stage = Stage::CollectionScan(CollectionScanStage {
            collection: self.collection.clone(),
            result,
            record_id,
            direction: scan.direction,
            resume_from,
            latest_timestamp,
            track_resume: scan.request_resume_token,
            read_gate: self.read_gate_slot,
        });

        if let Some(filter) = &scan.filter {
            let predicate = self.lowering.lower_predicate(filter, result, &mut self.slots)?;
            stage = Stage::Filter {
                input: Box::new(stage),
                predicate,
                constant: false,
            };
        }

        let mut outputs = StageOutputs::new();
        outputs.set(SlotRole::Result, result);
        outputs.set(SlotRole::RecordId, record_id);
        if let Some(slot) = latest_timestamp {
            outputs.set(SlotRole::ResumeTimestamp, slot);
        }

        // There is no index key to return; non-index plans answer a
        // return-key request with an empty object.
        if reqs.has(SlotRole::ReturnKey) {
            let return_key = self.slots.generate();
            stage = Stage::Project {
                input: Box::new(stage),
                bindings: vec![(return_key, Expr::ObjectConstruct(Vec::new()))],
            };
            outputs.set(SlotRole::ReturnKey, return_key);
        }

        Ok((stage, outputs))
    }

    pub(crate) fn build_virtual_scan(
        &mut self,
        scan: &VirtualScanNode,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if reqs.has(SlotRole::RecordId) && !scan.has_record_id {
            return Err(InternalError::build_invariant(
                "record id requested from a virtual scan without record ids",
            )
            .into());
        }
        if reqs.has(SlotRole::ResumeTimestamp) {
            return Err(InternalError::build_invariant(
                "virtual scans do not track storage timestamps",
            )
            .into());
        }

        let payload = self.slots.generate();
        let mut outputs = StageOutputs::new();

        let (slots, rows) = if scan.has_record_id {
            let record_id = self.slots.generate();
            outputs.set(SlotRole::RecordId, record_id);

            let mut rows = Vec::with_capacity(scan.docs.len());
            for doc in &scan.docs {
                match doc {
                    Value::Array(pair) if pair.len() == 2 => {
                        rows.push(vec![pair[0].clone(), pair[1].clone()]);
                    }
                    _ => {
                        return Err(InternalError::build_invariant(
                            "virtual scan rows with record ids must be [record-id, payload] pairs",
                        )
                        .into());
                    }
                }
            }
            (vec![record_id, payload], rows)
        } else {
            let rows = scan.docs.iter().map(|doc| vec![doc.clone()]).collect();
            (vec![payload], rows)
        };

        let mut stage = Stage::VirtualScan { rows, slots };

        if reqs.has(SlotRole::Result) {
            outputs.set(SlotRole::Result, payload);
        }

        // Index-key rows expose requested components by flat field read
        // from the key object.
        if let Some(keys) = reqs.index_keys() {
            let pattern = match (scan.kind, &scan.index_key_pattern) {
                (VirtualScanKind::IndexKeys, Some(pattern)) => pattern,
                _ => {
                    return Err(InternalError::build_invariant(
                        "index key components requested from a non-index virtual scan",
                    )
                    .into());
                }
            };

            let mut bindings = Vec::new();
            let mut key_slots = Vec::new();
            for position in keys.iter() {
                let Some((path, _)) = pattern.parts.get(position) else {
                    return Err(InternalError::build_invariant(format!(
                        "index key component {position} out of pattern range"
                    ))
                    .into());
                };
                let slot = self.slots.generate();
                bindings.push((slot, Expr::field_read(Expr::variable(payload), path.dotted())));
                key_slots.push((position, slot));
            }

            stage = Stage::Project {
                input: Box::new(stage),
                bindings,
            };
            outputs.set_index_key_slots(key_slots);
        }

        Ok((stage, outputs))
    }
}
