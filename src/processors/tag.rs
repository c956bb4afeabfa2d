use super::{Error, Processor, ProcessorContext};
use crate::config::{self, processor};
use crate::group::EventGroup;

/// Sets a fixed set of group tags, overwriting existing values.
pub struct AddTags {
    tags: Vec<(String, String)>,
}

impl AddTags {
    pub fn new(
        from_config: &processor::AddTags,
        _context: &mut ProcessorContext,
    ) -> Result<Self, Error> {
        if from_config.tags.keys().any(String::is_empty) {
            return Err(Error::InvalidParameter {
                key: "Tags",
                reason: "tag keys must not be empty".to_owned(),
            });
        }
        Ok(AddTags {
            tags: from_config
                .tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }
}

impl Processor for AddTags {
    fn name(&self) -> &'static str {
        config::TYPE_ADD_TAGS
    }

    fn process_group(&mut self, group: &mut EventGroup) {
        for (k, v) in self.tags.iter() {
            group.set_tag_copied(k.as_bytes(), v.as_bytes());
        }
    }
}
