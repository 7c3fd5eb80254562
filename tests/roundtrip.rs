//! End-to-end encode/decode tests over whole code-blocks.

use ebcot_rs::{
    CodeBlockParams, CodingError, Orientation, Tier1Decoder, Tier1Encoder, STYLE_LAZY,
    STYLE_PTERM, STYLE_RESET, STYLE_SEGSYM, STYLE_TERMALL,
};

/// Deterministic LCG so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    fn coeff(&mut self, magnitude_bits: u32) -> i32 {
        let mag = (self.next() % (1 << magnitude_bits)) as i32;
        if self.next() & 1 == 0 { mag } else { -mag }
    }
}

fn roundtrip(params: &CodeBlockParams, coeffs: &[i32], bit_depth: u32) -> Vec<i32> {
    let block = Tier1Encoder::new(params).encode(coeffs, bit_depth).unwrap();
    let lengths: Vec<usize> = block.passes.iter().map(|p| p.cumulative_len).collect();
    Tier1Decoder::new(params)
        .decode(&block.data, &lengths, block.max_bit_plane)
        .unwrap()
}

#[test]
fn random_blocks_roundtrip_across_shapes() {
    let mut rng = Lcg(0xDEC0DE);
    for (w, h) in [(5, 5), (5, 4), (4, 5), (1, 1), (3, 7), (5, 1), (16, 16), (32, 32)] {
        let params = CodeBlockParams::new(w, h, Orientation::Ll).unwrap();
        let coeffs: Vec<i32> = (0..w * h).map(|_| rng.coeff(7)).collect();
        assert_eq!(roundtrip(&params, &coeffs, 8), coeffs, "block {w}x{h}");
    }
}

#[test]
fn all_orientations_roundtrip() {
    let mut rng = Lcg(7);
    for orientation in [Orientation::Ll, Orientation::Hl, Orientation::Lh, Orientation::Hh] {
        let params = CodeBlockParams::new(8, 8, orientation).unwrap();
        let coeffs: Vec<i32> = (0..64).map(|_| rng.coeff(6)).collect();
        assert_eq!(roundtrip(&params, &coeffs, 8), coeffs, "{orientation:?}");
    }
}

#[test]
fn single_positive_coefficient() {
    let params = CodeBlockParams::new(8, 8, Orientation::Hl).unwrap();
    let mut coeffs = vec![0i32; 64];
    coeffs[0] = 5;
    assert_eq!(roundtrip(&params, &coeffs, 8), coeffs);
}

#[test]
fn dense_negative_block() {
    let params = CodeBlockParams::new(4, 4, Orientation::Hh).unwrap();
    let coeffs = vec![-9i32; 16];
    assert_eq!(roundtrip(&params, &coeffs, 8), coeffs);
}

#[test]
fn termall_and_continuous_decode_identically() {
    let mut rng = Lcg(31337);
    let coeffs: Vec<i32> = (0..256).map(|_| rng.coeff(9)).collect();

    let plain_params = CodeBlockParams::new(16, 16, Orientation::Lh).unwrap();
    let termall_params = plain_params.with_style(STYLE_TERMALL);

    let plain = roundtrip(&plain_params, &coeffs, 10);
    let termall = roundtrip(&termall_params, &coeffs, 10);
    assert_eq!(plain, coeffs);
    assert_eq!(termall, coeffs);

    // TERMALL pays for its byte-aligned pass boundaries in stream size.
    let a = Tier1Encoder::new(&plain_params).encode(&coeffs, 10).unwrap();
    let b = Tier1Encoder::new(&termall_params).encode(&coeffs, 10).unwrap();
    assert!(b.data.len() >= a.data.len());
    assert_eq!(a.zero_bit_planes, b.zero_bit_planes);
}

#[test]
fn reset_style_roundtrips() {
    let mut rng = Lcg(99);
    let coeffs: Vec<i32> = (0..64).map(|_| rng.coeff(7)).collect();
    for style in [STYLE_RESET, STYLE_RESET | STYLE_TERMALL] {
        let params = CodeBlockParams::new(8, 8, Orientation::Ll)
            .unwrap()
            .with_style(style);
        assert_eq!(roundtrip(&params, &coeffs, 8), coeffs, "style {style:#04x}");
    }
}

#[test]
fn lazy_style_roundtrips() {
    // Deep blocks so the lower planes actually run raw significance and
    // refinement passes.
    let mut rng = Lcg(0x1A2B);
    for (w, h) in [(8, 8), (16, 16), (5, 7)] {
        let coeffs: Vec<i32> = (0..w * h).map(|_| rng.coeff(8)).collect();
        for style in [STYLE_LAZY, STYLE_LAZY | STYLE_TERMALL, STYLE_LAZY | STYLE_SEGSYM] {
            let params = CodeBlockParams::new(w, h, Orientation::Hl)
                .unwrap()
                .with_style(style);
            assert_eq!(
                roundtrip(&params, &coeffs, 9),
                coeffs,
                "block {w}x{h} style {style:#04x}"
            );
        }
    }
}

#[test]
fn lazy_and_plain_reconstruct_identically() {
    // Bypassing the coder trades compression for speed in the noisy
    // lower planes; the streams differ but both reconstruct exactly.
    let mut rng = Lcg(0xF00D);
    let coeffs: Vec<i32> = (0..256).map(|_| rng.coeff(10)).collect();
    let plain = CodeBlockParams::new(16, 16, Orientation::Ll).unwrap();
    let lazy = plain.with_style(STYLE_LAZY);

    assert_eq!(roundtrip(&plain, &coeffs, 11), coeffs);
    assert_eq!(roundtrip(&lazy, &coeffs, 11), coeffs);

    let a = Tier1Encoder::new(&plain).encode(&coeffs, 11).unwrap();
    let b = Tier1Encoder::new(&lazy).encode(&coeffs, 11).unwrap();
    assert_eq!(a.max_bit_plane, b.max_bit_plane);
    assert_eq!(a.passes.len(), b.passes.len());
}

#[test]
fn predictable_termination_roundtrips() {
    let mut rng = Lcg(0xBEEF);
    let coeffs: Vec<i32> = (0..64).map(|_| rng.coeff(8)).collect();
    for style in [
        STYLE_PTERM,
        STYLE_PTERM | STYLE_TERMALL,
        STYLE_PTERM | STYLE_LAZY,
        STYLE_PTERM | STYLE_LAZY | STYLE_TERMALL,
    ] {
        let params = CodeBlockParams::new(8, 8, Orientation::Lh)
            .unwrap()
            .with_style(style);
        assert_eq!(roundtrip(&params, &coeffs, 9), coeffs, "style {style:#04x}");
    }
}

#[test]
fn segmentation_symbols_roundtrip() {
    let mut rng = Lcg(4242);
    let coeffs: Vec<i32> = (0..64).map(|_| rng.coeff(7)).collect();
    let plain = CodeBlockParams::new(8, 8, Orientation::Ll).unwrap();
    let marked = plain.with_style(STYLE_SEGSYM);

    assert_eq!(roundtrip(&marked, &coeffs, 8), coeffs);
    // Same coefficients either way; only the stream length differs.
    assert_eq!(roundtrip(&plain, &coeffs, 8), roundtrip(&marked, &coeffs, 8));
}

#[test]
fn roi_shift_is_reversed_on_decode() {
    let shift = 4u32;
    let params = CodeBlockParams::new(4, 4, Orientation::Ll)
        .unwrap()
        .with_roi_shift(shift)
        .unwrap();

    // Background magnitudes stay below 1 << shift; the region-of-interest
    // coefficient at (1, 1) is up-shifted by the caller before encoding.
    let mut coeffs = vec![0i32; 16];
    coeffs[2] = 3;
    coeffs[7] = -6;
    coeffs[5] = 5 << shift;

    let decoded = roundtrip(&params, &coeffs, 4);
    let mut expected = coeffs.clone();
    expected[5] = 5;
    assert_eq!(decoded, expected);
}

#[test]
fn layer_prefixes_decode_without_context_loss() {
    // Cutting the pass sequence at any boundary must decode cleanly, and
    // including everything must reproduce the input exactly. This is the
    // multi-layer case: the decoder resumes context state across the cut,
    // never reinitializing it per layer.
    let mut rng = Lcg(0xABCD);
    let coeffs: Vec<i32> = (0..64).map(|_| rng.coeff(6)).collect();
    let params = CodeBlockParams::new(8, 8, Orientation::Ll)
        .unwrap()
        .with_style(STYLE_TERMALL);

    let block = Tier1Encoder::new(&params).encode(&coeffs, 8).unwrap();
    let lengths: Vec<usize> = block.passes.iter().map(|p| p.cumulative_len).collect();
    let decoder = Tier1Decoder::new(&params);

    for cut in 1..=lengths.len() {
        let prefix = &lengths[..cut];
        let data = &block.data[..prefix[cut - 1]];
        let decoded = decoder.decode(data, prefix, block.max_bit_plane).unwrap();
        for (got, want) in decoded.iter().zip(&coeffs) {
            // A truncated reconstruction never overshoots the magnitude.
            assert!(got.unsigned_abs() <= want.unsigned_abs());
        }
        if cut == lengths.len() {
            assert_eq!(decoded, coeffs);
        }
    }
}

#[test]
fn truncating_a_non_final_pass_fails_cleanly() {
    let mut rng = Lcg(555);
    let coeffs: Vec<i32> = (0..64).map(|_| rng.coeff(6)).collect();
    let params = CodeBlockParams::new(8, 8, Orientation::Ll)
        .unwrap()
        .with_style(STYLE_TERMALL);

    let block = Tier1Encoder::new(&params).encode(&coeffs, 8).unwrap();
    let lengths: Vec<usize> = block.passes.iter().map(|p| p.cumulative_len).collect();
    assert!(lengths.len() >= 2);

    // Hand the decoder all pass lengths but only the first pass's bytes.
    let err = Tier1Decoder::new(&params)
        .decode(&block.data[..lengths[0]], &lengths, block.max_bit_plane)
        .unwrap_err();
    assert_eq!(err, CodingError::TruncatedStream);

    // An unrelated block decodes fine afterwards: nothing is shared.
    let other = CodeBlockParams::new(4, 4, Orientation::Hh).unwrap();
    let small = vec![1i32; 16];
    assert_eq!(roundtrip(&other, &small, 8), small);
}

#[test]
fn full_depth_magnitudes_roundtrip() {
    let params = CodeBlockParams::new(4, 4, Orientation::Ll).unwrap();
    let coeffs: Vec<i32> = vec![
        (1 << 15) - 1,
        -((1 << 15) - 1),
        1,
        -1,
        0,
        12345,
        -23456,
        255,
        -256,
        1 << 14,
        0,
        0,
        -3,
        7,
        9999,
        -9999,
    ];
    assert_eq!(roundtrip(&params, &coeffs, 16), coeffs);
}
