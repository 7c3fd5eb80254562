//! MQ arithmetic coder (ISO/IEC 15444-1 Annex C).
//!
//! Binary, table-driven, multiplication-free arithmetic coding over the
//! 47-state probability table. Context state is *not* owned here: every
//! encode/decode call takes a `&mut ContextState` from the caller's
//! [`ContextSession`](crate::context::ContextSession), which is what lets
//! one session span passes, bit-planes, and quality layers.
//!
//! The register conventions follow the C-annex software variant (also used
//! by OpenJPEG): the encoder buffer starts with a dummy carry byte, the
//! decoder appends an `FF FF` sentinel so BYTEIN never reads past the end.
//! The encoder LPS path always transitions via NLPS; the decoder's
//! LPS-detection branch conditionally resolves to MPS/NMPS when `A < Qe`.
//! That asymmetry is the standard's conditional exchange and both sides
//! here keep it verbatim.
//!
//! Both sides also support raw (bypass) segments: byte-aligned runs where
//! bits skip the arithmetic coder entirely and only 0xFF stuffing applies.
//! The lazy coding style alternates such segments with MQ-coded passes.

use crate::context::ContextState;
use crate::mq_table::MQ_TABLE;

/// CT sentinel meaning raw mode is active but no byte has been started.
const RAW_CT_FRESH: i32 = i32::MAX;

/// MQ encoder over a growable byte buffer.
pub struct MqEncoder {
    a: u32,
    c: u32,
    ct: i32,
    /// Output bytes. `buffer[0]` is a dummy byte that absorbs the first
    /// carry; real output starts at index 1.
    buffer: Vec<u8>,
    /// Index of the byte currently being completed.
    bp: usize,
}

impl MqEncoder {
    pub fn new() -> Self {
        Self {
            a: 0x8000,
            c: 0,
            ct: 12,
            buffer: vec![0],
            bp: 0,
        }
    }

    /// Encode one bit in the given context, updating the context's
    /// probability state.
    pub fn encode_bit(&mut self, ctx: &mut ContextState, bit: u32) {
        let state = MQ_TABLE[ctx.index()];
        let qe = state.qe;

        if bit == ctx.mps() {
            self.a -= qe;
            if self.a & 0x8000 == 0 {
                // Renormalization needed; conditional exchange first.
                if self.a < qe {
                    self.a = qe;
                } else {
                    self.c += qe;
                }
                *ctx = ContextState::new(state.nmps, ctx.mps() as u8);
                self.renormalize();
            } else {
                self.c += qe;
            }
        } else {
            self.a -= qe;
            if self.a < qe {
                self.c += qe;
            } else {
                self.a = qe;
            }
            // LPS always transitions via NLPS; switch flips the MPS sense.
            let mps = if state.switch { 1 - ctx.mps() } else { ctx.mps() };
            *ctx = ContextState::new(state.nlps, mps as u8);
            self.renormalize();
        }
    }

    fn renormalize(&mut self) {
        while self.a < 0x8000 {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
        }
    }

    fn byte_out(&mut self) {
        self.ensure(self.bp);
        if self.buffer[self.bp] == 0xFF {
            // Byte stuffing: only 7 bits follow a 0xFF.
            self.emit(self.c >> 20, 0xF_FFFF, 7);
        } else if self.c & 0x800_0000 == 0 {
            self.emit(self.c >> 19, 0x7_FFFF, 8);
        } else {
            // Carry ripples into the previous byte.
            self.buffer[self.bp] += 1;
            if self.buffer[self.bp] == 0xFF {
                self.c &= 0x7FF_FFFF;
                self.emit(self.c >> 20, 0xF_FFFF, 7);
            } else {
                self.emit(self.c >> 19, 0x7_FFFF, 8);
            }
        }
    }

    fn emit(&mut self, byte: u32, mask: u32, ct: i32) {
        self.bp += 1;
        self.ensure(self.bp);
        self.buffer[self.bp] = byte as u8;
        self.c &= mask;
        self.ct = ct;
    }

    fn ensure(&mut self, idx: usize) {
        if idx >= self.buffer.len() {
            self.buffer.resize(idx + 1, 0);
        }
    }

    /// Terminate the current pass: SETBITS, push out the final bytes, and
    /// leave the stream at a byte-aligned point that does not end in 0xFF.
    ///
    /// After this the encoder is in a flushed state; call
    /// [`restart`](Self::restart) to continue encoding further passes into
    /// the same buffer, or take the bytes with [`bytes`](Self::bytes).
    pub fn terminate(&mut self) {
        // SETBITS: force the remaining C bits to 1 without leaving the
        // final interval.
        let upper = self.c + self.a;
        self.c |= 0xFFFF;
        if self.c >= upper {
            self.c -= 0x8000;
        }

        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();

        // A coding pass must not end with 0xFF on the wire.
        if self.buffer[self.bp] != 0xFF {
            self.bp += 1;
        }
    }

    /// Predictable-termination flush (PTERM): pushes the pending code bits
    /// out with the exact byte pattern the standard mandates, which lets a
    /// decoder detect a corrupted pass boundary.
    pub fn terminate_predictable(&mut self) {
        let mut k = 12 - self.ct;
        while k > 0 {
            self.c <<= self.ct;
            self.ct = 0;
            self.byte_out();
            k -= self.ct;
        }
        if self.buffer[self.bp] != 0xFF {
            self.byte_out();
        }
    }

    /// Switch to raw (bypass) output after a terminated pass. Raw bits go
    /// straight into the buffer with only 0xFF stuffing applied.
    pub fn restart_raw(&mut self) {
        self.c = 0;
        self.ct = RAW_CT_FRESH;
    }

    /// Append one raw bit, bypassing the arithmetic coder.
    pub fn encode_raw_bit(&mut self, bit: u32) {
        if self.ct == RAW_CT_FRESH {
            self.ct = 8;
        }
        self.ct -= 1;
        self.c += bit << self.ct;
        if self.ct == 0 {
            self.ensure(self.bp);
            self.buffer[self.bp] = self.c as u8;
            self.ct = 8;
            if self.buffer[self.bp] == 0xFF {
                // Stuffing: only 7 bits may follow a 0xFF.
                self.ct = 7;
            }
            self.bp += 1;
            self.c = 0;
        }
    }

    /// Terminate a raw segment. Without `predictable` the pad byte is
    /// dropped when the decoder's end-of-data synthesis reproduces it.
    pub fn terminate_raw(&mut self, predictable: bool) {
        if self.ct < 7 || (self.ct == 7 && (predictable || self.buffer[self.bp - 1] != 0xFF)) {
            // Pad the partial byte with alternating bits.
            let mut bit = 0u32;
            while self.ct > 0 {
                self.ct -= 1;
                self.c += bit << self.ct;
                bit ^= 1;
            }
            self.ensure(self.bp);
            self.buffer[self.bp] = self.c as u8;
            self.bp += 1;
        } else if self.ct == 7 && self.buffer[self.bp - 1] == 0xFF {
            if !predictable {
                self.bp -= 1;
            }
        } else if self.ct == 8
            && !predictable
            && self.bp > 1
            && self.buffer[self.bp - 1] == 0x7F
            && self.buffer[self.bp - 2] == 0xFF
        {
            self.bp -= 2;
        }
    }

    /// Reinitialize the registers after a terminated pass so the next pass
    /// continues into the same buffer (TERMALL mode).
    pub fn restart(&mut self) {
        self.a = 0x8000;
        self.c = 0;
        self.ct = 12;
        if self.bp > 0 {
            self.bp -= 1;
        }
        if self.buffer[self.bp] == 0xFF {
            self.ct = 13;
        }
    }

    /// Completed output bytes so far (the byte under construction is
    /// excluded until a terminate).
    pub fn bytes(&self) -> &[u8] {
        if self.bp < 1 { &[] } else { &self.buffer[1..self.bp] }
    }

    /// Number of completed output bytes.
    pub fn len(&self) -> usize {
        self.bp.saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MqEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// MQ decoder over one byte segment.
///
/// Exhausting the input never fails: BYTEIN feeds the `0xFF00` marker
/// pattern forever, matching the standard's behavior for truncated
/// streams. Callers bound the number of decode calls using the pass-length
/// table.
pub struct MqDecoder {
    /// Input bytes with an `FF FF` sentinel appended.
    data: Vec<u8>,
    /// Index of the last byte fed into C.
    bp: usize,
    a: u32,
    c: u32,
    ct: i32,
}

impl MqDecoder {
    pub fn new(data: &[u8]) -> Self {
        let mut dec = Self {
            data: Vec::new(),
            bp: 0,
            a: 0,
            c: 0,
            ct: 0,
        };
        dec.resume(data);
        dec
    }

    /// Reinitialize over a new byte segment (INITDEC). Used per pass in
    /// TERMALL mode; context state lives in the caller's session and is
    /// untouched.
    pub fn resume(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
        self.data.extend_from_slice(&[0xFF, 0xFF]);
        self.bp = 0;
        self.ct = 0;

        self.c = if data.is_empty() {
            0xFF << 16
        } else {
            u32::from(data[0]) << 16
        };
        self.byte_in();
        self.c <<= 7;
        self.ct -= 7;
        self.a = 0x8000;
    }

    /// Reinitialize over a raw (bypass) segment. Bits come straight off
    /// the bytes, honoring 0xFF stuffing; exhausting the segment feeds
    /// 1-bits, which reproduces the pad bytes the encoder dropped.
    pub fn resume_raw(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
        self.data.extend_from_slice(&[0xFF, 0xFF]);
        self.bp = 0;
        self.a = 0;
        self.c = 0;
        self.ct = 0;
    }

    /// Decode one raw bit. Only valid after [`resume_raw`](Self::resume_raw).
    pub fn decode_raw_bit(&mut self) -> u32 {
        if self.ct == 0 {
            if self.c == 0xFF {
                let next = u32::from(self.data[self.bp]);
                if next > 0x8F {
                    // Marker or the sentinel: synthesize 1-bits.
                    self.c = 0xFF;
                    self.ct = 8;
                } else {
                    self.c = next;
                    self.bp += 1;
                    self.ct = 7;
                }
            } else {
                self.c = u32::from(self.data[self.bp]);
                self.bp += 1;
                self.ct = 8;
            }
        }
        self.ct -= 1;
        (self.c >> self.ct) & 1
    }

    /// Decode one bit in the given context, updating the context's
    /// probability state.
    pub fn decode_bit(&mut self, ctx: &mut ContextState) -> u32 {
        let state = MQ_TABLE[ctx.index()];
        let qe = state.qe;

        self.a -= qe;

        let bit;
        if (self.c >> 16) < qe {
            // The code lies in the LPS sub-interval. Conditional
            // exchange: when the MPS sub-interval is the smaller of the
            // two, the decoded symbol is actually the MPS.
            if self.a < qe {
                self.a = qe;
                bit = ctx.mps();
                *ctx = ContextState::new(state.nmps, ctx.mps() as u8);
            } else {
                self.a = qe;
                bit = 1 - ctx.mps();
                let mps = if state.switch { 1 - ctx.mps() } else { ctx.mps() };
                *ctx = ContextState::new(state.nlps, mps as u8);
            }
            self.renormalize();
        } else {
            self.c -= qe << 16;
            if self.a & 0x8000 != 0 {
                return ctx.mps();
            }
            if self.a < qe {
                bit = 1 - ctx.mps();
                let mps = if state.switch { 1 - ctx.mps() } else { ctx.mps() };
                *ctx = ContextState::new(state.nlps, mps as u8);
            } else {
                bit = ctx.mps();
                *ctx = ContextState::new(state.nmps, ctx.mps() as u8);
            }
            self.renormalize();
        }
        bit
    }

    fn renormalize(&mut self) {
        while self.a < 0x8000 {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
        }
    }

    fn byte_in(&mut self) {
        let next = self.data[self.bp + 1];
        if self.data[self.bp] == 0xFF {
            if next > 0x8F {
                // Marker (or the sentinel): stop consuming, feed 1-bits.
                self.c += 0xFF00;
                self.ct = 8;
            } else {
                // Stuffed byte: only 7 valid bits.
                self.bp += 1;
                self.c += u32::from(next) << 9;
                self.ct = 7;
            }
        } else {
            self.bp += 1;
            self.c += u32::from(next) << 8;
            self.ct = 8;
        }
    }
}
