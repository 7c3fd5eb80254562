//! MQ-coder probability state table (ISO/IEC 15444-1 Table C.2).
//!
//! One immutable 47-entry table shared by every encoder and decoder
//! instance. Each entry carries the LPS probability estimate `Qe`, the
//! next-state indices for the MPS and LPS paths, and the switch flag that
//! flips the MPS sense on an LPS at the bottom of a probability ladder.

/// One row of the probability state machine.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MqState {
    pub qe: u32,
    pub nmps: u8,
    pub nlps: u8,
    pub switch: bool,
}

const fn s(qe: u32, nmps: u8, nlps: u8, switch: bool) -> MqState {
    MqState { qe, nmps, nlps, switch }
}

/// Number of probability states.
pub(crate) const NUM_STATES: usize = 47;

/// Standard Table C.2. States 0-5 form the fast-attack ramp, 6-45 the main
/// ladder, 46 is the non-adaptive state used by the uniform context.
pub(crate) static MQ_TABLE: [MqState; NUM_STATES] = [
    s(0x5601, 1, 1, true),
    s(0x3401, 2, 6, false),
    s(0x1801, 3, 9, false),
    s(0x0AC1, 4, 12, false),
    s(0x0521, 5, 29, false),
    s(0x0221, 38, 33, false),
    s(0x5601, 7, 6, true),
    s(0x5401, 8, 14, false),
    s(0x4801, 9, 14, false),
    s(0x3801, 10, 14, false),
    s(0x3001, 11, 17, false),
    s(0x2401, 12, 18, false),
    s(0x1C01, 13, 20, false),
    s(0x1601, 29, 21, false),
    s(0x5601, 15, 14, true),
    s(0x5401, 16, 14, false),
    s(0x5101, 17, 15, false),
    s(0x4801, 18, 16, false),
    s(0x3801, 19, 17, false),
    s(0x3401, 20, 18, false),
    s(0x3001, 21, 19, false),
    s(0x2801, 22, 19, false),
    s(0x2401, 23, 20, false),
    s(0x2201, 24, 21, false),
    s(0x1C01, 25, 22, false),
    s(0x1801, 26, 23, false),
    s(0x1601, 27, 24, false),
    s(0x1401, 28, 25, false),
    s(0x1201, 29, 26, false),
    s(0x1101, 30, 27, false),
    s(0x0AC1, 31, 28, false),
    s(0x09C1, 32, 29, false),
    s(0x08A1, 33, 30, false),
    s(0x0521, 34, 31, false),
    s(0x0441, 35, 32, false),
    s(0x02A1, 36, 33, false),
    s(0x0221, 37, 34, false),
    s(0x0141, 38, 35, false),
    s(0x0111, 39, 36, false),
    s(0x0085, 40, 37, false),
    s(0x0049, 41, 38, false),
    s(0x0025, 42, 39, false),
    s(0x0015, 43, 40, false),
    s(0x0009, 44, 41, false),
    s(0x0005, 45, 42, false),
    s(0x0001, 45, 43, false),
    s(0x5601, 46, 46, false),
];
