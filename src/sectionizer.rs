//! Sectionizer (SPEC_FULL.md §4.4): groups consecutive wrappers into
//! sections sharing one slicing pattern and one placement.
//!
//! Grounded on `original_source/httomo/runner/platform_section.py`
//! (`sectionize`/`_backpropagate_section_patterns`/`_finalize_patterns`/
//! `_set_method_patterns`), confirmed to use **pre-break** semantics: the
//! method that fails the compatibility/reference check becomes the first
//! member of the *new* section, not the last member of the old one
//! (SPEC_FULL.md §9 Open Questions resolution).

use crate::error::Result;
use crate::pattern::{Pattern, Placement};
use std::collections::HashSet;

/// Everything the sectionizer needs to know about one wrapper in the
/// pipeline, independent of how that wrapper is actually executed.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub id: usize,
    pub pattern: Pattern,
    pub placement: Placement,
    pub save_result: bool,
    pub is_rotation: bool,
    /// Ids of methods (earlier in the pipeline) whose side output this
    /// method's parameters reference.
    pub references: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub pattern: Pattern,
    pub placement: Placement,
    pub method_ids: Vec<usize>,
    pub is_last: bool,
    pub needs_reslice_after: bool,
}

pub struct SectionizeResult {
    pub sections: Vec<Section>,
    pub loader_pattern: Pattern,
    pub loader_needs_initial_reslice: bool,
    /// Method ids whose wrapper must return host-resident data at the end of
    /// its `execute` call (SPEC_FULL.md §4.4 "Return-to-host hints").
    pub return_to_host: HashSet<usize>,
}

pub fn sectionize(loader_pattern: Pattern, methods: &[MethodDescriptor]) -> Result<SectionizeResult> {
    let mut sections: Vec<Vec<usize>> = Vec::new();
    let mut section_patterns: Vec<Pattern> = Vec::new();

    let mut cur_pattern = loader_pattern;
    let mut cur_placement: Option<Placement> = None;
    let mut cur_methods: Vec<usize> = Vec::new();

    let by_id: std::collections::HashMap<usize, &MethodDescriptor> =
        methods.iter().map(|m| (m.id, m)).collect();

    let references_current_section = |m: &MethodDescriptor, cur_methods: &[usize]| {
        m.references.iter().any(|r| cur_methods.contains(r))
    };

    for m in methods {
        let prev_requested_save = cur_methods
            .last()
            .map(|&prev_id| by_id[&prev_id].save_result)
            .unwrap_or(false);

        let should_break = match cur_placement {
            None => false,
            Some(placement) => {
                m.placement != placement
                    || !cur_pattern.compatible_with(m.pattern)
                    || references_current_section(m, &cur_methods)
                    || prev_requested_save
            }
        };

        if should_break {
            sections.push(std::mem::take(&mut cur_methods));
            section_patterns.push(cur_pattern);
            if m.pattern != Pattern::All {
                cur_pattern = m.pattern;
            }
            cur_methods.push(m.id);
            cur_placement = Some(m.placement);
        } else {
            cur_methods.push(m.id);
            cur_placement = Some(m.placement);
            if cur_pattern == Pattern::All && m.pattern != Pattern::All {
                cur_pattern = m.pattern;
            }
        }
    }
    if !cur_methods.is_empty() {
        sections.push(cur_methods);
        section_patterns.push(cur_pattern);
    }

    let placements: Vec<Placement> = sections
        .iter()
        .map(|ids| by_id[&ids[0]].placement)
        .collect();

    // Back-propagate: any section still at `all` inherits the next section's
    // pattern; if every section is `all`, default to projection.
    let mut last_pattern = Pattern::All;
    for pattern in section_patterns.iter_mut().rev() {
        if *pattern == Pattern::All {
            *pattern = last_pattern;
        }
        last_pattern = *pattern;
    }

    let mut loader_pattern = loader_pattern;
    let mut loader_needs_initial_reslice = false;
    if !section_patterns.is_empty() {
        if loader_pattern == Pattern::All {
            loader_pattern = last_pattern;
        } else if loader_pattern != last_pattern {
            loader_needs_initial_reslice = true;
        }
    }

    if !section_patterns.is_empty() && section_patterns[0] == Pattern::All {
        tracing::warn!("all pipeline sections support all patterns: choosing projection");
        for pattern in section_patterns.iter_mut() {
            *pattern = Pattern::Projection;
        }
        loader_pattern = Pattern::Projection;
    }

    let n = sections.len();
    let mut built_sections: Vec<Section> = sections
        .into_iter()
        .zip(section_patterns.iter().copied())
        .zip(placements.iter().copied())
        .enumerate()
        .map(|(i, ((method_ids, pattern), placement))| Section {
            pattern,
            placement,
            method_ids,
            is_last: i + 1 == n,
            needs_reslice_after: false,
        })
        .collect();

    for i in 0..built_sections.len().saturating_sub(1) {
        if built_sections[i].pattern != built_sections[i + 1].pattern {
            built_sections[i].needs_reslice_after = true;
        }
    }

    let mut return_to_host: HashSet<usize> = HashSet::new();
    for (i, section) in built_sections.iter().enumerate() {
        if let Some(&last_id) = section.method_ids.last() {
            return_to_host.insert(last_id);
        }
        if let Some(next_section) = built_sections.get(i + 1) {
            for (k, &method_id) in section.method_ids.iter().enumerate() {
                if k == 0 {
                    continue;
                }
                let m = by_id[&method_id];
                if m.is_rotation {
                    let prev_id = section.method_ids[k - 1];
                    let prev_placement = by_id[&prev_id].placement;
                    let next_placement = next_section
                        .method_ids
                        .first()
                        .map(|id| by_id[id].placement)
                        .unwrap_or(prev_placement);
                    if prev_placement != next_placement {
                        return_to_host.insert(prev_id);
                    }
                }
            }
        }
    }

    Ok(SectionizeResult {
        sections: built_sections,
        loader_pattern,
        loader_needs_initial_reslice,
        return_to_host,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(id: usize, pattern: Pattern, placement: Placement) -> MethodDescriptor {
        MethodDescriptor {
            id,
            pattern,
            placement,
            save_result: false,
            is_rotation: false,
            references: vec![],
        }
    }

    #[test]
    fn pattern_change_starts_a_new_section_pre_break() {
        let methods = vec![
            m(0, Pattern::Projection, Placement::Device),
            m(1, Pattern::Projection, Placement::Device),
            m(2, Pattern::Sinogram, Placement::Device),
        ];
        let result = sectionize(Pattern::Projection, &methods).unwrap();
        assert_eq!(result.sections.len(), 2);
        assert_eq!(result.sections[0].method_ids, vec![0, 1]);
        assert_eq!(result.sections[1].method_ids, vec![2]);
        assert!(result.sections[0].needs_reslice_after);
    }

    #[test]
    fn placement_change_starts_a_new_section() {
        let methods = vec![
            m(0, Pattern::Projection, Placement::Device),
            m(1, Pattern::Projection, Placement::Host),
        ];
        let result = sectionize(Pattern::Projection, &methods).unwrap();
        assert_eq!(result.sections.len(), 2);
    }

    #[test]
    fn a_save_result_request_starts_a_new_section_at_the_next_method() {
        let mut first = m(0, Pattern::Projection, Placement::Device);
        first.save_result = true;
        let methods = vec![
            first,
            m(1, Pattern::Projection, Placement::Device),
            m(2, Pattern::Projection, Placement::Device),
        ];
        let result = sectionize(Pattern::Projection, &methods).unwrap();
        assert_eq!(result.sections.len(), 2);
        assert_eq!(result.sections[0].method_ids, vec![0]);
        assert_eq!(result.sections[1].method_ids, vec![1, 2]);
    }

    #[test]
    fn side_output_reference_within_section_breaks_pre_method() {
        let mut second = m(1, Pattern::Projection, Placement::Device);
        second.references = vec![0];
        let methods = vec![m(0, Pattern::Projection, Placement::Device), second];
        let result = sectionize(Pattern::Projection, &methods).unwrap();
        assert_eq!(result.sections.len(), 2);
        assert_eq!(result.sections[1].method_ids, vec![1]);
    }

    #[test]
    fn scenario_4_all_patterns_finalize_to_projection_with_one_section() {
        let methods = vec![
            m(0, Pattern::All, Placement::Device),
            m(1, Pattern::All, Placement::Device),
        ];
        let result = sectionize(Pattern::All, &methods).unwrap();
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.sections[0].pattern, Pattern::Projection);
        assert_eq!(result.loader_pattern, Pattern::Projection);
    }

    #[test]
    fn loader_pattern_mismatch_requests_initial_reslice() {
        let methods = vec![m(0, Pattern::Sinogram, Placement::Device)];
        let result = sectionize(Pattern::Projection, &methods).unwrap();
        assert!(result.loader_needs_initial_reslice);
    }

    #[test]
    fn last_method_of_every_section_returns_host_resident_data() {
        let methods = vec![
            m(0, Pattern::Projection, Placement::Device),
            m(1, Pattern::Sinogram, Placement::Device),
        ];
        let result = sectionize(Pattern::Projection, &methods).unwrap();
        assert!(result.return_to_host.contains(&0));
        assert!(result.return_to_host.contains(&1));
    }
}
