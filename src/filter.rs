use std::collections::HashSet;

use crate::types::Instance;

/// Keep the instances whose `group/id` starts with any of `prefixes`.
///
/// Order follows `instances`; an instance matching several prefixes (or
/// listed twice by the director) is kept once. No prefixes means no
/// matches, never "match everything".
pub fn filter_instances(instances: &[Instance], prefixes: &[String]) -> Vec<Instance> {
    if prefixes.is_empty() { return Vec::new(); }
    let mut seen: HashSet<String> = HashSet::new();
    let mut matched = Vec::new();
    for inst in instances {
        let slug = inst.slug();
        if !prefixes.iter().any(|p| slug.starts_with(p.as_str())) { continue; }
        if seen.insert(slug) {
            matched.push(inst.clone());
        }
    }
    matched
}
