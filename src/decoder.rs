//! EBCOT Tier-1 decoder.
//!
//! Mirrors the encoder's pass state machine exactly: same stripe order,
//! same context selection, same visited-flag lifecycle. The caller (the
//! packet layer) supplies the compressed bytes, the cumulative per-pass
//! byte lengths, and the most significant coded bit-plane.
//!
//! Truncation rules: decoding fewer passes than were encoded is normal
//! (rate truncation), and a short *final* pass decodes as far as the bytes
//! allow, leaving remaining coefficients at their last-known magnitude.
//! A short non-final pass is a corrupt stream and fails with
//! [`CodingError::TruncatedStream`] without touching any other block.

use log::{debug, trace};

use crate::code_block::{CodeBlockParams, CodeBlockState, MAX_MAGNITUDE_BITS};
use crate::context::{
    ContextSession, Orientation, CTX_RL, CTX_UNI, REFINE, SIG, SIG_NEIGHBORS, VISITED,
    mag_refinement_context, sign_coding_context, zero_coding_context,
};
use crate::encoder::{PassKind, RunStep, is_raw_pass, is_terminating_pass};
use crate::error::CodingError;
use crate::mq_coder::MqDecoder;

/// Cumulative byte position where the coding segment starting at
/// `pass_idx` ends: the recorded length of its first terminated pass, or
/// the end of the stream when the pass table stops inside a segment.
fn segment_end(
    params: &CodeBlockParams,
    pass_lengths: &[usize],
    pass_idx: usize,
    plane: u32,
    kind: PassKind,
    max_bit_plane: u32,
) -> usize {
    let mut idx = pass_idx;
    let mut plane = plane;
    let mut kind = kind;
    loop {
        if is_terminating_pass(params, kind, plane, max_bit_plane) {
            return pass_lengths[idx];
        }
        idx += 1;
        if idx >= pass_lengths.len() {
            return pass_lengths[pass_lengths.len() - 1];
        }
        kind = match kind {
            PassKind::SignificancePropagation => PassKind::MagnitudeRefinement,
            PassKind::MagnitudeRefinement => PassKind::Cleanup,
            PassKind::Cleanup => {
                plane -= 1;
                PassKind::SignificancePropagation
            }
        };
    }
}

/// Tier-1 decoder for one code-block geometry.
pub struct Tier1Decoder {
    params: CodeBlockParams,
}

impl Tier1Decoder {
    pub fn new(params: &CodeBlockParams) -> Self {
        Self { params: *params }
    }

    /// Decode a code-block.
    ///
    /// `pass_lengths` holds the cumulative byte position after each
    /// included pass; `max_bit_plane` is the most significant coded plane
    /// (from the packet header). Returns the reconstructed signed
    /// coefficients, row-major, with any ROI shift already reversed.
    pub fn decode(
        &self,
        data: &[u8],
        pass_lengths: &[usize],
        max_bit_plane: u32,
    ) -> Result<Vec<i32>, CodingError> {
        // The top plane comes from the packet header; reject values the
        // magnitude budget cannot hold before any shift is attempted.
        if max_bit_plane >= MAX_MAGNITUDE_BITS {
            return Err(CodingError::InvalidBitDepth);
        }
        let num_passes = pass_lengths.len();
        if num_passes == 0 {
            return Err(CodingError::InvalidPassLengths);
        }
        let max_passes = (max_bit_plane as usize + 1) * 3 - 2;
        if num_passes > max_passes {
            return Err(CodingError::InvalidPassLengths);
        }
        let mut prev = 0;
        for (i, &end) in pass_lengths.iter().enumerate() {
            if end < prev {
                return Err(CodingError::InvalidPassLengths);
            }
            // A non-final pass must have all of its bytes.
            if i + 1 < num_passes && end > data.len() {
                return Err(CodingError::TruncatedStream);
            }
            prev = end;
        }

        trace!(
            "decode block {}x{} ({:?}): {} passes, top plane {}",
            self.params.width(),
            self.params.height(),
            self.params.orientation(),
            num_passes,
            max_bit_plane
        );

        let lazy = self.params.lazy();

        let mut session = DecodeSession {
            orientation: self.params.orientation(),
            state: CodeBlockState::new(self.params.width(), self.params.height()),
            contexts: ContextSession::new(),
            // Re-initialized below at every byte-aligned segment start.
            mq: MqDecoder::new(&[]),
            plane: 0,
        };

        let mut pass_idx = 0;
        let mut prev_end = 0;
        // The stream opens a segment; every terminated pass closes one.
        let mut prev_terminated = true;
        'planes: for plane in (0..=max_bit_plane).rev() {
            session.plane = plane;
            session.state.clear_visited();

            let kinds: &[PassKind] = if plane == max_bit_plane {
                &[PassKind::Cleanup]
            } else {
                &[
                    PassKind::SignificancePropagation,
                    PassKind::MagnitudeRefinement,
                    PassKind::Cleanup,
                ]
            };

            for &kind in kinds {
                if pass_idx >= num_passes {
                    break 'planes;
                }

                let raw = is_raw_pass(kind, plane, max_bit_plane, lazy);
                if prev_terminated {
                    // The previous pass was flushed, so this pass starts
                    // a byte-aligned segment. Context states carry across
                    // in the session either way.
                    let end = segment_end(
                        &self.params,
                        pass_lengths,
                        pass_idx,
                        plane,
                        kind,
                        max_bit_plane,
                    )
                    .min(data.len());
                    if raw {
                        session.mq.resume_raw(&data[prev_end..end]);
                    } else {
                        session.mq.resume(&data[prev_end..end]);
                    }
                }

                match kind {
                    PassKind::SignificancePropagation => session.significance_pass(raw),
                    PassKind::MagnitudeRefinement => session.refinement_pass(raw),
                    PassKind::Cleanup => {
                        session.cleanup_pass();
                        if self.params.segmentation_symbols() {
                            session.check_segmentation_symbols();
                        }
                    }
                }

                prev_terminated = is_terminating_pass(&self.params, kind, plane, max_bit_plane);
                if prev_terminated {
                    prev_end = pass_lengths[pass_idx].min(data.len());
                }

                if self.params.reset_contexts() {
                    session.contexts.reset();
                }
                pass_idx += 1;
            }
        }

        if self.params.roi_shift > 0 {
            session.reverse_roi_shift(self.params.roi_shift);
        }

        Ok(session.state.extract())
    }
}

/// Working state of one block decode.
struct DecodeSession {
    orientation: Orientation,
    state: CodeBlockState,
    contexts: ContextSession,
    mq: MqDecoder,
    plane: u32,
}

impl DecodeSession {
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

                    let bit = if raw {
                        self.mq.decode_raw_bit()
                    } else {
                        let label = zero_coding_context(flags, self.orientation);
                        self.mq.decode_bit(self.contexts.get_mut(label))
                    };
                    self.state.set_flag(idx, VISITED);

                    if bit != 0 {
                        let negative = self.decode_sign(flags, raw);
                        self.become_significant(x, y, idx, negative);
                    }
                }
            }
        }
    }

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

                    let bit = if raw {
                        self.mq.decode_raw_bit()
                    } else {
                        let label = mag_refinement_context(flags);
                        self.mq.decode_bit(self.contexts.get_mut(label))
                    };
                    if bit != 0 {
                        let value = self.state.value(idx);
                        let step = 1i32 << self.plane;
                        self.state
                            .set_value(idx, if value >= 0 { value + step } else { value - step });
                    }
                    self.state.set_flag(idx, REFINE);
                }
            }
        }
    }

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
                            let rl = self.mq.decode_bit(self.contexts.get_mut(CTX_RL));
                            if rl == 0 {
                                break;
                            }
                            let hi = self.mq.decode_bit(self.contexts.get_mut(CTX_UNI));
                            let lo = self.mq.decode_bit(self.contexts.get_mut(CTX_UNI));
                            step = RunStep::CodeRunContinuation {
                                run_index: ((hi << 1) | lo) as usize,
                            };
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

    /// Decode one cleanup sample; `implicit` samples come from a
    /// run-length hit and skip the significance bit. Returns whether the
    /// sample was processed.
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
            let label = zero_coding_context(flags, self.orientation);
            self.mq.decode_bit(self.contexts.get_mut(label))
        };

        if bit != 0 {
            let negative = self.decode_sign(flags, false);
            self.become_significant(x, y, idx, negative);
        }

        self.state.clear_flag(idx, VISITED);
        true
    }

    /// Decode the sign of a newly significant coefficient. Raw segments
    /// carry the sign bit directly, without the neighborhood prediction.
    fn decode_sign(&mut self, flags: u32, raw: bool) -> bool {
        if raw {
            self.mq.decode_raw_bit() != 0
        } else {
            let (label, predicted) = sign_coding_context(flags);
            (self.mq.decode_bit(self.contexts.get_mut(label)) ^ predicted) != 0
        }
    }

    /// Seed the magnitude of a newly significant coefficient at the
    /// current plane and propagate the neighbor flags.
    fn become_significant(&mut self, x: usize, y: usize, idx: usize, negative: bool) {
        let magnitude = 1i32 << self.plane;
        self.state
            .set_value(idx, if negative { -magnitude } else { magnitude });
        self.state.set_significant(x, y, negative);
    }

    /// Consume the four segmentation symbols coded after a cleanup pass.
    /// A mismatch means the stream desynchronized somewhere upstream; the
    /// coefficients decoded so far are kept either way.
    fn check_segmentation_symbols(&mut self) {
        let mut symbols = 0u32;
        for _ in 0..4 {
            symbols = (symbols << 1) | self.mq.decode_bit(self.contexts.get_mut(CTX_UNI));
        }
        if symbols != 0b1010 {
            debug!("segmentation symbol mismatch: got {symbols:04b}");
        }
    }

    /// MaxShift reversal: any magnitude that reaches `1 << shift` belongs
    /// to the region of interest and is shifted back down.
    fn reverse_roi_shift(&mut self, shift: u32) {
        let threshold = 1i32 << shift;
        let (width, height) = self.dims();
        let mut shifted = 0usize;
        for y in 0..height {
            for x in 0..width {
                let idx = self.state.idx(x, y);
                let value = self.state.value(idx);
                if value.abs() >= threshold {
                    self.state.set_value(idx, value >> shift);
                    shifted += 1;
                }
            }
        }
        debug!("reversed ROI shift {shift} on {shifted} coefficients");
    }

    fn dims(&self) -> (usize, usize) {
        (self.state.width(), self.state.height())
    }
}
