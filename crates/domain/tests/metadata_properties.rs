//! Property coverage for job segmentation and mapping diffs.

use proptest::prelude::*;
use reindex_domain::{
    Attribute, AttributeName, AttributeType, CudType, EntityType, EntityTypeId, JobId,
    ReindexAction, ReindexJob,
};

const TYPES: [&str; 4] = ["Alpha", "Beta", "Gamma", "Delta"];

fn action_strategy() -> impl Strategy<Value = (usize, u8)> {
    (0..TYPES.len(), 0u8..3)
}

fn cud(index: u8) -> CudType {
    match index {
        0 => CudType::Create,
        1 => CudType::Update,
        _ => CudType::Delete,
    }
}

proptest! {
    #[test]
    fn segments_preserve_order_and_cover_every_action(specs in prop::collection::vec(action_strategy(), 0..40)) {
        let actions: Vec<ReindexAction> = specs
            .iter()
            .enumerate()
            .map(|(order, (type_index, cud_index))| {
                let id = EntityTypeId::parse(TYPES[*type_index]).unwrap();
                ReindexAction::metadata(id, cud(*cud_index), order as u64)
            })
            .collect();
        let job = ReindexJob::new(JobId::parse("job-p").unwrap(), actions).unwrap();

        let segments = job.segments();
        let total: usize = segments.values().map(Vec::len).sum();
        prop_assert_eq!(total, job.len());
        for (entity_type_id, segment) in &segments {
            prop_assert!(segment.iter().all(|a| &a.entity_type_id == entity_type_id));
            prop_assert!(segment.windows(2).all(|w| w[0].action_order < w[1].action_order));
        }
    }

    #[test]
    fn diff_of_identical_mappings_is_empty(type_indexes in prop::collection::vec(0..AttributeType::ALL.len(), 0..8)) {
        let mut entity_type = EntityType::new(
            EntityTypeId::parse("Sample").unwrap(),
            AttributeName::parse("id").unwrap(),
        );
        for (i, type_index) in type_indexes.iter().enumerate() {
            let attr_type = AttributeType::ALL[*type_index];
            let mut attribute = Attribute::new(AttributeName::parse(format!("a{i}")).unwrap(), attr_type);
            if attr_type.is_reference() {
                attribute = attribute.with_ref_entity_type(EntityTypeId::parse("Other").unwrap());
            }
            entity_type = entity_type.with_attribute(attribute);
        }

        let mapping = entity_type.mapping().unwrap();
        prop_assert!(mapping.diff(&mapping).is_empty());
    }
}
