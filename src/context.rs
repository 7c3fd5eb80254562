//! EBCOT Tier-1 context modeling (ISO/IEC 15444-1 Annex D).
//!
//! 19 context labels are shared by the three coding passes:
//!
//! - 0-8: zero coding (significance), selected from the 8-neighbor
//!   significance pattern, grouped per subband orientation
//! - 9-13: sign coding, selected from horizontal/vertical neighbor sign
//!   contributions, together with a predicted sign the coded bit is XORed
//!   against
//! - 14-16: magnitude refinement
//! - 17: run-length flag (cleanup pass)
//! - 18: uniform (run index and segmentation symbols)
//!
//! Context states live in a [`ContextSession`] owned by the caller and
//! passed into every pass, so whether a pass inherits or resets context
//! state is an explicit decision rather than a construction side effect.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::mq_table::NUM_STATES;

/// First zero-coding context; also the "all neighbors insignificant" label.
pub const CTX_ZC_START: usize = 0;
/// First sign-coding context.
pub const CTX_SC_START: usize = 9;
/// First magnitude-refinement context.
pub const CTX_MR_START: usize = 14;
/// Run-length context.
pub const CTX_RL: usize = 17;
/// Uniform context (run index, segmentation symbols).
pub const CTX_UNI: usize = 18;
/// Total number of context labels.
pub const NUM_CONTEXTS: usize = 19;

// Coefficient state flags, one u32 per grid cell. Neighbor significance
// and sign are mirrored into each cell when a coefficient becomes
// significant so context lookup never walks the grid.
pub(crate) const SIG: u32 = 0x0001;
pub(crate) const REFINE: u32 = 0x0002;
pub(crate) const VISITED: u32 = 0x0004;

pub(crate) const SIG_N: u32 = 0x0010;
pub(crate) const SIG_S: u32 = 0x0020;
pub(crate) const SIG_W: u32 = 0x0040;
pub(crate) const SIG_E: u32 = 0x0080;
pub(crate) const SIG_NW: u32 = 0x0100;
pub(crate) const SIG_NE: u32 = 0x0200;
pub(crate) const SIG_SW: u32 = 0x0400;
pub(crate) const SIG_SE: u32 = 0x0800;
pub(crate) const SIG_NEIGHBORS: u32 =
    SIG_N | SIG_S | SIG_W | SIG_E | SIG_NW | SIG_NE | SIG_SW | SIG_SE;

pub(crate) const SIGN: u32 = 0x1000;
pub(crate) const SIGN_N: u32 = 0x2000;
pub(crate) const SIGN_S: u32 = 0x4000;
pub(crate) const SIGN_W: u32 = 0x8000;
pub(crate) const SIGN_E: u32 = 0x10000;

/// Subband orientation of a code-block, used to group the zero-coding
/// neighbor configuration (HL transposes the horizontal/vertical roles,
/// HH switches to a diagonal-first grouping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Orientation {
    Ll = 0,
    Hl = 1,
    Lh = 2,
    Hh = 3,
}

/// One context's probability state: table index (0-46) packed in the low
/// 7 bits, MPS sense in bit 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextState(u8);

impl ContextState {
    pub(crate) fn new(index: u8, mps: u8) -> Self {
        debug_assert!((index as usize) < NUM_STATES);
        Self(index | (mps << 7))
    }

    pub(crate) fn index(self) -> usize {
        (self.0 & 0x7F) as usize
    }

    pub(crate) fn mps(self) -> u32 {
        u32::from(self.0 >> 7)
    }
}

/// The 19 context states of one code-block coding session.
///
/// Created once per code-block and threaded by reference through every
/// pass on that block. It persists across passes, bit-planes, and quality
/// layers; it is reset only at an explicit style-driven point (RESET after
/// each pass) or when a new code-block session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSession {
    states: [ContextState; NUM_CONTEXTS],
}

impl ContextSession {
    pub fn new() -> Self {
        let mut session = Self {
            states: [ContextState::new(0, 0); NUM_CONTEXTS],
        };
        session.reset();
        session
    }

    /// Restore the standard initial states: everything at state 0 except
    /// the uniform context (46), the run-length context (3), and the
    /// all-insignificant zero-coding context (4).
    pub fn reset(&mut self) {
        self.states = [ContextState::new(0, 0); NUM_CONTEXTS];
        self.states[CTX_UNI] = ContextState::new(46, 0);
        self.states[CTX_RL] = ContextState::new(3, 0);
        self.states[CTX_ZC_START] = ContextState::new(4, 0);
    }

    /// Mutable handle to one context's state, for threading into
    /// [`MqEncoder::encode_bit`](crate::mq_coder::MqEncoder::encode_bit) /
    /// [`MqDecoder::decode_bit`](crate::mq_coder::MqDecoder::decode_bit).
    ///
    /// Panics if `label >= NUM_CONTEXTS`.
    pub fn get_mut(&mut self, label: usize) -> &mut ContextState {
        &mut self.states[label]
    }

    #[cfg(test)]
    pub(crate) fn get(&self, label: usize) -> ContextState {
        self.states[label]
    }
}

impl Default for ContextSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-coding context from the neighbor significance pattern
/// (Table D.1). LL and LH use the horizontal-first grouping, HL swaps
/// horizontal and vertical, HH groups on the diagonal count.
pub(crate) fn zero_coding_context(flags: u32, orientation: Orientation) -> usize {
    let h = count(flags, SIG_W) + count(flags, SIG_E);
    let v = count(flags, SIG_N) + count(flags, SIG_S);
    let d = count(flags, SIG_NW) + count(flags, SIG_NE) + count(flags, SIG_SW) + count(flags, SIG_SE);

    match orientation {
        Orientation::Ll | Orientation::Lh => zc_low_high(h, v, d),
        Orientation::Hl => zc_low_high(v, h, d),
        Orientation::Hh => zc_high_high(h + v, d),
    }
}

fn count(flags: u32, bit: u32) -> u32 {
    u32::from(flags & bit != 0)
}

fn zc_low_high(h: u32, v: u32, d: u32) -> usize {
    if h == 2 {
        8
    } else if h == 1 {
        if v >= 1 {
            7
        } else if d >= 1 {
            6
        } else {
            5
        }
    } else if v == 2 {
        4
    } else if v == 1 {
        3
    } else if d >= 2 {
        2
    } else if d == 1 {
        1
    } else {
        0
    }
}

fn zc_high_high(hv: u32, d: u32) -> usize {
    if d >= 3 {
        8
    } else if d == 2 {
        if hv >= 1 { 7 } else { 6 }
    } else if d == 1 {
        if hv >= 2 {
            5
        } else if hv == 1 {
            4
        } else {
            3
        }
    } else if hv >= 2 {
        2
    } else if hv == 1 {
        1
    } else {
        0
    }
}

/// Sign-coding context and predicted sign (Table D.3).
///
/// Returns `(label, prediction)`. The bit on the wire is the true sign
/// (1 = negative) XOR the prediction, so decoding XORs back.
pub(crate) fn sign_coding_context(flags: u32) -> (usize, u32) {
    let hc = contribution(flags, SIG_W, SIGN_W) + contribution(flags, SIG_E, SIGN_E);
    let vc = contribution(flags, SIG_N, SIGN_N) + contribution(flags, SIG_S, SIGN_S);
    let hc = hc.clamp(-1, 1);
    let vc = vc.clamp(-1, 1);

    match (hc, vc) {
        (1, 1) => (13, 0),
        (1, 0) => (12, 0),
        (1, -1) => (11, 0),
        (0, 1) => (10, 0),
        (0, 0) => (9, 0),
        (0, -1) => (10, 1),
        (-1, 1) => (11, 1),
        (-1, 0) => (12, 1),
        (-1, -1) => (13, 1),
        _ => unreachable!("clamped to -1..=1"),
    }
}

fn contribution(flags: u32, sig: u32, sign: u32) -> i32 {
    if flags & sig == 0 {
        0
    } else if flags & sign != 0 {
        -1
    } else {
        1
    }
}

/// Magnitude-refinement context (Table D.4): 16 once refined, otherwise
/// 15 with significant neighbors, 14 without.
pub(crate) fn mag_refinement_context(flags: u32) -> usize {
    if flags & REFINE != 0 {
        CTX_MR_START + 2
    } else if flags & SIG_NEIGHBORS != 0 {
        CTX_MR_START + 1
    } else {
        CTX_MR_START
    }
}
