//! Hot patch or full reload?
//!
//! When a new successful artifact is available for a target with live
//! sessions, its metadata is compared against what each session last
//! received. The first difference that cannot be hot-patched wins, in
//! the fixed order below.

use super::message::ReloadReason;
use crate::core::CompilationMode;
use crate::inject::ArtifactMeta;

/// The server-side decision for one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Deliver the artifact; the client patches in place.
    HotPatch,
    /// Direct the client to reload the whole page.
    FullReload(ReloadReason),
}

/// Compare the previously delivered artifact against the new one.
pub fn judge(mode: CompilationMode, prev: &ArtifactMeta, next: &ArtifactMeta) -> Verdict {
    if prev.flags_fingerprint != next.flags_fingerprint {
        return Verdict::FullReload(ReloadReason::FlagsTypeChanged);
    }
    if prev.program_kind != next.program_kind {
        return Verdict::FullReload(ReloadReason::ProgramTypeChanged);
    }
    if mode == CompilationMode::Debug
        && prev.debug_metadata_fingerprint != next.debug_metadata_fingerprint
    {
        return Verdict::FullReload(ReloadReason::DebugMetadataChanged);
    }
    if mode == CompilationMode::Optimize && prev.record_fields != next.record_fields {
        return Verdict::FullReload(ReloadReason::OptimizeFieldsChanged);
    }
    if prev.init_fingerprint != next.init_fingerprint {
        return Verdict::FullReload(ReloadReason::InitChanged);
    }
    Verdict::HotPatch
}

/// Ports present in `next` but not in `prev` (both sorted). Reported as
/// an advisory; removed ports never force a reload.
pub fn ports_added(prev: &ArtifactMeta, next: &ArtifactMeta) -> Vec<String> {
    next.ports
        .iter()
        .filter(|port| !prev.ports.contains(port))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::ProgramKind;
    use rustc_hash::FxHashSet;

    fn meta() -> ArtifactMeta {
        ArtifactMeta {
            program_kind: ProgramKind::Element,
            flags_fingerprint: 1,
            init_fingerprint: 2,
            debug_metadata_fingerprint: None,
            record_fields: None,
            ports: vec!["send".into()],
        }
    }

    #[test]
    fn test_identical_meta_hot_patches() {
        assert_eq!(
            judge(CompilationMode::Standard, &meta(), &meta()),
            Verdict::HotPatch
        );
    }

    #[test]
    fn test_flags_change_wins_over_everything() {
        let mut next = meta();
        next.flags_fingerprint = 99;
        next.program_kind = ProgramKind::Sandbox;
        next.init_fingerprint = 99;
        assert_eq!(
            judge(CompilationMode::Standard, &meta(), &next),
            Verdict::FullReload(ReloadReason::FlagsTypeChanged)
        );
    }

    #[test]
    fn test_program_kind_change() {
        let mut next = meta();
        next.program_kind = ProgramKind::Sandbox;
        assert_eq!(
            judge(CompilationMode::Standard, &meta(), &next),
            Verdict::FullReload(ReloadReason::ProgramTypeChanged)
        );
    }

    #[test]
    fn test_debug_metadata_only_matters_in_debug_mode() {
        let mut prev = meta();
        prev.debug_metadata_fingerprint = Some(7);
        let mut next = meta();
        next.debug_metadata_fingerprint = Some(8);

        assert_eq!(
            judge(CompilationMode::Debug, &prev, &next),
            Verdict::FullReload(ReloadReason::DebugMetadataChanged)
        );
        assert_eq!(
            judge(CompilationMode::Standard, &prev, &next),
            Verdict::HotPatch
        );
    }

    #[test]
    fn test_record_fields_only_matter_in_optimize_mode() {
        let mut prev = meta();
        prev.record_fields = Some(FxHashSet::from_iter(["aB".to_string()]));
        let mut next = meta();
        next.record_fields = Some(FxHashSet::from_iter(["aC".to_string()]));

        assert_eq!(
            judge(CompilationMode::Optimize, &prev, &next),
            Verdict::FullReload(ReloadReason::OptimizeFieldsChanged)
        );
        assert_eq!(
            judge(CompilationMode::Standard, &prev, &next),
            Verdict::HotPatch
        );
    }

    #[test]
    fn test_init_change() {
        let mut next = meta();
        next.init_fingerprint = 99;
        assert_eq!(
            judge(CompilationMode::Standard, &meta(), &next),
            Verdict::FullReload(ReloadReason::InitChanged)
        );
    }

    #[test]
    fn test_ports_added_and_removed() {
        let prev = meta();
        let mut next = meta();
        next.ports = vec!["recv".into(), "send".into()];
        assert_eq!(ports_added(&prev, &next), ["recv"]);

        // Removal: no advisory, no reload.
        let mut gone = meta();
        gone.ports.clear();
        assert!(ports_added(&prev, &gone).is_empty());
        assert_eq!(judge(CompilationMode::Standard, &prev, &gone), Verdict::HotPatch);
    }
}
