//! EBCOT Tier-1 encoder (ISO/IEC 15444-1 Annex D).
//!
//! Encodes one code-block's quantized coefficients bit-plane by bit-plane,
//! most significant plane first. The first plane runs the cleanup pass
//! only (nothing can be significant yet); every following plane runs
//! significance propagation, magnitude refinement, and cleanup, in that
//! order. The output is the compressed byte stream plus a pass table with
//! one entry per coding pass, which is what rate allocation downstream
//! cuts quality layers from.
//!
//! Performance notes: this is the hot path of JPEG 2000 encoding. A
//! typical workload is a 32x32 block over 12-16 bit-planes, with the MQ
//! coder as the inner-loop bottleneck. Code-blocks are independent, so
//! callers parallelize across blocks, never inside one.

use log::trace;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::code_block::{CodeBlockParams, CodeBlockState, MAX_MAGNITUDE_BITS};
use crate::context::{
    ContextSession, Orientation, CTX_RL, CTX_UNI, REFINE, SIG, SIG_NEIGHBORS, VISITED,
    mag_refinement_context, sign_coding_context, zero_coding_context,
};
use crate::error::CodingError;
use crate::mq_coder::MqEncoder;

/// The three coding-pass kinds, in per-plane order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PassKind {
    SignificancePropagation = 0,
    MagnitudeRefinement = 1,
    Cleanup = 2,
}

/// One row of the pass table handed to rate allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassInfo {
    pub kind: PassKind,
    pub bit_plane: u32,
    /// Whether the arithmetic coder was flushed at the end of this pass.
    /// Terminated passes end on exact byte boundaries.
    pub terminated: bool,
    /// Completed output bytes after this pass. For a non-terminated pass
    /// the byte under construction is not yet counted.
    pub cumulative_len: usize,
}

/// Result of encoding one code-block.
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    pub data: Vec<u8>,
    pub passes: Vec<PassInfo>,
    /// Leading all-zero bit-planes below the declared bit depth. Computed
    /// once per block; identical no matter how the passes are later split
    /// into layers.
    pub zero_bit_planes: u32,
    /// Most significant coded bit-plane. The decoder needs this (it
    /// travels in the packet header, outside this core).
    pub max_bit_plane: u32,
}

/// Control flow of the cleanup pass over one 4-sample column,
/// made explicit so the run-length special case is testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunStep {
    /// Full column, nothing visited or significant in it or next to it:
    /// try run-length coding.
    EvaluateRunEligibility,
    /// A run-length hit: the sample at `run_index` is implicitly
    /// significant, the rest of the column is coded sample by sample.
    CodeRunContinuation { run_index: usize },
    /// No run-length coding; code each remaining sample individually.
    CodeIndividual { from: usize },
}

/// Whether a pass is coded raw. Under the lazy style, significance and
/// refinement passes more than three planes below the top one bypass the
/// arithmetic coder.
pub(crate) fn is_raw_pass(kind: PassKind, plane: u32, top_plane: u32, lazy: bool) -> bool {
    lazy && kind != PassKind::Cleanup && plane + 3 < top_plane
}

/// Whether the coder is flushed after this pass. The final cleanup always
/// terminates; TERMALL terminates everything; the lazy style additionally
/// terminates at every switchover between MQ and raw segments, so both
/// start byte-aligned.
pub(crate) fn is_terminating_pass(
    params: &CodeBlockParams,
    kind: PassKind,
    plane: u32,
    top_plane: u32,
) -> bool {
    if kind == PassKind::Cleanup && plane == 0 {
        return true;
    }
    if params.termall() {
        return true;
    }
    if params.lazy() {
        return match kind {
            PassKind::SignificancePropagation => false,
            PassKind::MagnitudeRefinement => plane + 3 < top_plane,
            PassKind::Cleanup => plane + 3 <= top_plane,
        };
    }
    false
}

/// Tier-1 encoder for one code-block geometry.
pub struct Tier1Encoder {
    params: CodeBlockParams,
}

impl Tier1Encoder {
    pub fn new(params: &CodeBlockParams) -> Self {
        Self { params: *params }
    }

    /// Encode a code-block. `coeffs` is row-major, signed, already
    /// quantized (and ROI up-shifted, when a shift is in effect);
    /// `bit_depth` is the declared magnitude bit depth before any shift.
    pub fn encode(&self, coeffs: &[i32], bit_depth: u32) -> Result<EncodedBlock, CodingError> {
        let mut state = CodeBlockState::new(self.params.width(), self.params.height());
        state.load(coeffs)?;
        if bit_depth == 0 || bit_depth > MAX_MAGNITUDE_BITS - self.params.roi_shift {
            return Err(CodingError::InvalidBitDepth);
        }

        let total_depth = bit_depth + self.params.roi_shift;
        // An all-zero block still codes one (empty) cleanup pass, so the
        // pass table is never empty.
        let num_planes = match state.max_bit_plane() {
            Some(top) => top + 1,
            None => 1,
        };
        if num_planes > total_depth {
            return Err(CodingError::InvalidBitDepth);
        }
        let zero_bit_planes = total_depth - num_planes;

        trace!(
            "encode block {}x{} ({:?}): {} planes, {} zero planes",
            self.params.width(),
            self.params.height(),
            self.params.orientation(),
            num_planes,
            zero_bit_planes
        );

        let mut session = EncodeSession {
            orientation: self.params.orientation(),
            state,
            contexts: ContextSession::new(),
            mq: MqEncoder::new(),
            plane: 0,
        };

        let mut passes = Vec::with_capacity((num_planes as usize) * 3 - 2);
        let mut prev_terminated = false;
        let top_plane = num_planes - 1;
        let lazy = self.params.lazy();

        for plane in (0..num_planes).rev() {
            session.plane = plane;
            session.state.clear_visited();

            let kinds: &[PassKind] = if plane == top_plane {
                &[PassKind::Cleanup]
            } else {
                &[
                    PassKind::SignificancePropagation,
                    PassKind::MagnitudeRefinement,
                    PassKind::Cleanup,
                ]
            };

            for &kind in kinds {
                let raw = is_raw_pass(kind, plane, top_plane, lazy);
                if prev_terminated {
                    if raw {
                        session.mq.restart_raw();
                    } else {
                        session.mq.restart();
                    }
                    prev_terminated = false;
                }

                match kind {
                    PassKind::SignificancePropagation => session.significance_pass(raw),
                    PassKind::MagnitudeRefinement => session.refinement_pass(raw),
                    PassKind::Cleanup => {
                        session.cleanup_pass();
                        if self.params.segmentation_symbols() {
                            session.code_segmentation_symbols();
                        }
                    }
                }

                let terminated = is_terminating_pass(&self.params, kind, plane, top_plane);
                if terminated {
                    if raw {
                        session.mq.terminate_raw(self.params.predictable_termination());
                    } else if self.params.predictable_termination() {
                        session.mq.terminate_predictable();
                    } else {
                        session.mq.terminate();
                    }
                    prev_terminated = true;
                }
                passes.push(PassInfo {
                    kind,
                    bit_plane: plane,
                    terminated,
                    cumulative_len: session.mq.len(),
                });

                if self.params.reset_contexts() {
                    session.contexts.reset();
                }
            }
        }

        Ok(EncodedBlock {
            data: session.mq.bytes().to_vec(),
            passes,
            zero_bit_planes,
            max_bit_plane: num_planes - 1,
        })
    }
}

/// Working state of one block encode: the flag/coefficient grids, the 19
/// context states, the arithmetic coder, and the plane being coded.
struct EncodeSession {
    orientation: Orientation,
    state: CodeBlockState,
    contexts: ContextSession,
    mq: MqEncoder,
    plane: u32,
}

impl EncodeSession {
    /// Significance propagation: code a significance bit for every
    /// not-yet-significant coefficient with at least one significant
    /// neighbor, plus its sign when it becomes significant. `raw` passes
    /// skip the arithmetic coder and code the sign unpredicted.
    fn significance_pass(&mut self, raw: bool) {
        let (width, height) = self.dims();
        for k in (0..height).step_by(4) {
            for x in 0..width {
                for y in k..(k + 4).min(height) {
                    let idx = self.state.idx(x, y);
                    let flags = self.state.flags(idx);
                    if flags & SIG != 0 || flags & SIG_NEIGHBORS == 0 {
                        continue;
                    }

                    let bit = self.state.magnitude_bit(idx, self.plane);
                    if raw {
                        self.mq.encode_raw_bit(bit);
                    } else {
                        let label = zero_coding_context(flags, self.orientation);
                        self.mq.encode_bit(self.contexts.get_mut(label), bit);
                    }
                    self.state.set_flag(idx, VISITED);

                    if bit != 0 {
                        let negative = self.state.value(idx) < 0;
                        if raw {
                            self.mq.encode_raw_bit(u32::from(negative));
                        } else {
                            let (label, predicted) = sign_coding_context(flags);
                            self.mq
                                .encode_bit(self.contexts.get_mut(label), u32::from(negative) ^ predicted);
                        }
                        self.state.set_significant(x, y, negative);
                    }
                }
            }
        }
    }

    /// Magnitude refinement: one bit for every coefficient already
    /// significant before this plane and not visited in it.
    fn refinement_pass(&mut self, raw: bool) {
        let (width, height) = self.dims();
        for k in (0..height).step_by(4) {
            for x in 0..width {
                for y in k..(k + 4).min(height) {
                    let idx = self.state.idx(x, y);
                    let flags = self.state.flags(idx);
                    if flags & SIG == 0 || flags & VISITED != 0 {
                        continue;
                    }

                    let bit = self.state.magnitude_bit(idx, self.plane);
                    if raw {
                        self.mq.encode_raw_bit(bit);
                    } else {
                        let label = mag_refinement_context(flags);
                        self.mq.encode_bit(self.contexts.get_mut(label), bit);
                    }
                    self.state.set_flag(idx, REFINE);
                }
            }
        }
    }

    /// Cleanup: everything not covered by the two previous passes, with
    /// run-length coding over fully-insignificant 4-sample columns.
    fn cleanup_pass(&mut self) {
        let (width, height) = self.dims();
        for k in (0..height).step_by(4) {
            for x in 0..width {
                let mut step = if k + 4 <= height && self.state.run_eligible(x, k) {
                    RunStep::EvaluateRunEligibility
                } else {
                    RunStep::CodeIndividual { from: 0 }
                };

                loop {
                    match step {
                        RunStep::EvaluateRunEligibility => {
                            let run = (0..4).find(|&dy| {
                                self.state.magnitude_bit(self.state.idx(x, k + dy), self.plane) != 0
                            });
                            self.mq
                                .encode_bit(self.contexts.get_mut(CTX_RL), u32::from(run.is_some()));
                            match run {
                                None => break,
                                Some(run_index) => {
                                    // Run index, 2 bits MSB first, uniform context.
                                    let r = run_index as u32;
                                    self.mq.encode_bit(self.contexts.get_mut(CTX_UNI), (r >> 1) & 1);
                                    self.mq.encode_bit(self.contexts.get_mut(CTX_UNI), r & 1);
                                    step = RunStep::CodeRunContinuation { run_index };
                                }
                            }
                        }
                        RunStep::CodeRunContinuation { run_index } => {
                            let mut implicit = true;
                            for dy in run_index..4 {
                                if self.cleanup_sample(x, k + dy, implicit) {
                                    implicit = false;
                                }
                            }
                            break;
                        }
                        RunStep::CodeIndividual { from } => {
                            for dy in from..4 {
                                if k + dy >= height {
                                    break;
                                }
                                self.cleanup_sample(x, k + dy, false);
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Code one cleanup sample. `implicit` samples are known significant
    /// from the run index, so only their sign is coded. Returns whether
    /// the sample was processed (not skipped as visited/significant).
    fn cleanup_sample(&mut self, x: usize, y: usize, implicit: bool) -> bool {
        let idx = self.state.idx(x, y);
        let flags = self.state.flags(idx);
        if flags & (VISITED | SIG) != 0 {
            self.state.clear_flag(idx, VISITED);
            return false;
        }

        let bit = if implicit {
            1
        } else {
            let bit = self.state.magnitude_bit(idx, self.plane);
            let label = zero_coding_context(flags, self.orientation);
            self.mq.encode_bit(self.contexts.get_mut(label), bit);
            bit
        };

        if bit != 0 {
            let negative = self.state.value(idx) < 0;
            let (label, predicted) = sign_coding_context(flags);
            self.mq
                .encode_bit(self.contexts.get_mut(label), u32::from(negative) ^ predicted);
            self.state.set_significant(x, y, negative);
        }

        self.state.clear_flag(idx, VISITED);
        true
    }

    /// Four-symbol segmentation marker (1, 0, 1, 0) in the uniform
    /// context, coded at the end of a cleanup pass under SEGSYM.
    fn code_segmentation_symbols(&mut self) {
        for bit in [1, 0, 1, 0] {
            self.mq.encode_bit(self.contexts.get_mut(CTX_UNI), bit);
        }
    }

    fn dims(&self) -> (usize, usize) {
        (self.state.width(), self.state.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_block::{STYLE_LAZY, STYLE_SEGSYM, STYLE_TERMALL};

    fn params(w: usize, h: usize) -> CodeBlockParams {
        CodeBlockParams::new(w, h, Orientation::Ll).unwrap()
    }

    #[test]
    fn all_zero_block_is_single_minimal_cleanup_pass() {
        let block = Tier1Encoder::new(&params(4, 4)).encode(&[0; 16], 8).unwrap();
        assert_eq!(block.passes.len(), 1);
        assert_eq!(block.passes[0].kind, PassKind::Cleanup);
        assert_eq!(block.passes[0].bit_plane, 0);
        assert!(block.passes[0].terminated);
        assert_eq!(block.max_bit_plane, 0);
        assert_eq!(block.zero_bit_planes, 7);
        // Four run-length "all insignificant" bits plus flush.
        assert!(block.data.len() <= 4, "minimal stream, got {} bytes", block.data.len());
    }

    #[test]
    fn pass_count_matches_plane_count() {
        // Magnitude 5 -> planes 2..0, so 3 * 3 - 2 = 7 passes.
        let mut coeffs = [0i32; 64];
        coeffs[0] = 5;
        let block = Tier1Encoder::new(&params(8, 8)).encode(&coeffs, 8).unwrap();
        assert_eq!(block.max_bit_plane, 2);
        assert_eq!(block.zero_bit_planes, 5);
        assert_eq!(block.passes.len(), 7);
        assert_eq!(block.passes[0].kind, PassKind::Cleanup);
        assert_eq!(block.passes[1].kind, PassKind::SignificancePropagation);
        assert_eq!(block.passes[6].kind, PassKind::Cleanup);
        assert_eq!(block.passes[6].bit_plane, 0);
    }

    #[test]
    fn cumulative_lengths_are_monotonic() {
        let coeffs: Vec<i32> = (0..256).map(|i| (i * 37 % 101) - 50).collect();
        let block = Tier1Encoder::new(&params(16, 16)).encode(&coeffs, 8).unwrap();
        let mut prev = 0;
        for pass in &block.passes {
            assert!(pass.cumulative_len >= prev);
            prev = pass.cumulative_len;
        }
        assert_eq!(prev, block.data.len());
    }

    #[test]
    fn termall_terminates_every_pass() {
        let coeffs: Vec<i32> = (0..64).map(|i| i % 7 - 3).collect();
        let p = params(8, 8).with_style(STYLE_TERMALL);
        let block = Tier1Encoder::new(&p).encode(&coeffs, 8).unwrap();
        assert!(block.passes.iter().all(|p| p.terminated));
        // No terminated pass may end in a 0xFF byte.
        for pass in &block.passes {
            if pass.cumulative_len > 0 {
                assert_ne!(block.data[pass.cumulative_len - 1], 0xFF);
            }
        }
    }

    #[test]
    fn termall_is_at_least_as_long_as_continuous() {
        let coeffs: Vec<i32> = (0..64).map(|i| (i * 13 % 29) - 14).collect();
        let plain = Tier1Encoder::new(&params(8, 8)).encode(&coeffs, 8).unwrap();
        let termall = Tier1Encoder::new(&params(8, 8).with_style(STYLE_TERMALL))
            .encode(&coeffs, 8)
            .unwrap();
        assert!(termall.data.len() >= plain.data.len());
    }

    #[test]
    fn segsym_only_lengthens_the_stream() {
        let coeffs: Vec<i32> = (0..64).map(|i| i % 5 - 2).collect();
        let plain = Tier1Encoder::new(&params(8, 8)).encode(&coeffs, 8).unwrap();
        let marked = Tier1Encoder::new(&params(8, 8).with_style(STYLE_SEGSYM))
            .encode(&coeffs, 8)
            .unwrap();
        assert_eq!(plain.passes.len(), marked.passes.len());
        assert!(marked.data.len() >= plain.data.len());
    }

    #[test]
    fn zero_bit_planes_is_stable_across_styles() {
        let coeffs: Vec<i32> = (0..64).map(|i| i % 9).collect();
        let a = Tier1Encoder::new(&params(8, 8)).encode(&coeffs, 10).unwrap();
        let b = Tier1Encoder::new(&params(8, 8).with_style(STYLE_TERMALL))
            .encode(&coeffs, 10)
            .unwrap();
        assert_eq!(a.zero_bit_planes, b.zero_bit_planes);
        assert_eq!(a.max_bit_plane, b.max_bit_plane);
    }

    #[test]
    fn lazy_style_terminates_at_segment_boundaries() {
        // Top plane 5: planes 0 and 1 bypass the coder in their
        // significance and refinement passes, and every switchover
        // between MQ and raw coding ends a byte-aligned segment.
        let mut coeffs = [0i32; 64];
        coeffs[10] = 40;
        coeffs[30] = -33;
        let p = params(8, 8).with_style(STYLE_LAZY);
        let block = Tier1Encoder::new(&p).encode(&coeffs, 8).unwrap();
        assert_eq!(block.max_bit_plane, 5);
        assert_eq!(block.passes.len(), 16);

        for pass in &block.passes {
            let expect = match (pass.kind, pass.bit_plane) {
                (PassKind::Cleanup, 0..=2) => true,
                (PassKind::MagnitudeRefinement, 0..=1) => true,
                _ => false,
            };
            assert_eq!(
                pass.terminated, expect,
                "{:?} at plane {}",
                pass.kind, pass.bit_plane
            );
        }
    }

    #[test]
    fn rejects_huge_bit_depth_without_overflow() {
        let err = Tier1Encoder::new(&params(4, 4))
            .encode(&[0; 16], u32::MAX)
            .unwrap_err();
        assert_eq!(err, CodingError::InvalidBitDepth);

        let p = params(4, 4).with_roi_shift(8).unwrap();
        let err = Tier1Encoder::new(&p).encode(&[0; 16], u32::MAX).unwrap_err();
        assert_eq!(err, CodingError::InvalidBitDepth);
    }

    #[test]
    fn rejects_zero_bit_depth() {
        let err = Tier1Encoder::new(&params(4, 4)).encode(&[0; 16], 0).unwrap_err();
        assert_eq!(err, CodingError::InvalidBitDepth);
    }

    #[test]
    fn rejects_magnitudes_beyond_bit_depth() {
        let mut coeffs = [0i32; 16];
        coeffs[3] = 256; // needs 9 magnitude bits
        let err = Tier1Encoder::new(&params(4, 4)).encode(&coeffs, 8).unwrap_err();
        assert_eq!(err, CodingError::InvalidBitDepth);
    }

    #[test]
    fn rejects_wrong_coefficient_count() {
        let err = Tier1Encoder::new(&params(4, 4)).encode(&[0; 15], 8).unwrap_err();
        assert_eq!(err, CodingError::DataSizeMismatch);
    }
}
