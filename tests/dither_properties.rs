use std::collections::BTreeSet;

use ttyvid::dither::{quantize_channel, MAX_BITS, MIN_BITS};
use ttyvid::{DitherMode, Quantizer};

const DIFFUSION_MODES: [DitherMode; 6] = [
    DitherMode::FloydSteinberg,
    DitherMode::FloydSteinbergStable,
    DitherMode::Sierra,
    DitherMode::SierraStable,
    DitherMode::Atkinson,
    DitherMode::AtkinsonStable,
];

fn noise(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..(width * height) {
        for _ in 0..3 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            data.push((state >> 24) as u8);
        }
        data.push(255);
    }
    data
}

fn gray_row(values: &[u8]) -> Vec<u8> {
    values.iter().flat_map(|&v| [v, v, v, 255]).collect()
}

#[test]
fn quantizing_twice_changes_nothing() {
    for bits in MIN_BITS..=MAX_BITS {
        for value in 0..=255_u8 {
            let once = quantize_channel(value, bits);
            assert_eq!(
                quantize_channel(once, bits),
                once,
                "value {value} at {bits} bits is not stable"
            );
        }
    }
}

#[test]
fn quantized_values_are_evenly_spaced_levels() {
    for bits in MIN_BITS..=MAX_BITS {
        let top = (1_u32 << bits) - 1;
        let levels: BTreeSet<u8> = (0..=top)
            .map(|k| (f64::from(k) * 255.0 / f64::from(top)).round() as u8)
            .collect();
        assert_eq!(levels.len(), 1 << bits);

        let seen: BTreeSet<u8> = (0..=255_u8).map(|v| quantize_channel(v, bits)).collect();
        assert!(
            seen.is_subset(&levels),
            "{bits} bits produced off-level values: {:?}",
            seen.difference(&levels).collect::<Vec<_>>()
        );
        assert_eq!(seen.len(), 1 << bits, "{bits} bits missed a level");
    }
}

#[test]
fn already_quantized_frames_survive_every_diffusion_mode() {
    for bits in 2..=MAX_BITS {
        let mut source = noise(17, 9, u32::from(bits));
        for px in source.chunks_exact_mut(4) {
            for value in &mut px[..3] {
                *value = quantize_channel(*value, bits);
            }
        }
        for mode in DIFFUSION_MODES {
            let mut frame = source.clone();
            Quantizer::new().apply(&mut frame, 17, 9, bits, mode);
            assert_eq!(frame, source, "{mode} at {bits} bits moved a level value");
        }
    }
}

#[test]
fn one_bit_uses_luminance_for_every_mode() {
    for mode in DitherMode::ALL {
        if mode == DitherMode::None {
            continue;
        }
        let mut frame = gray_row(&[128, 127]);
        Quantizer::new().apply(&mut frame, 2, 1, 1, mode);
        assert_eq!(frame, gray_row(&[255, 0]), "{mode}");
    }
}

#[test]
fn output_is_deterministic_and_independent_of_scratch_history() {
    let source = noise(31, 12, 7);
    for mode in DitherMode::ALL {
        let mut fresh = source.clone();
        Quantizer::new().apply(&mut fresh, 31, 12, 3, mode);

        let mut reused = Quantizer::new();
        let mut warmup = noise(64, 4, 99);
        reused.apply(&mut warmup, 64, 4, 2, mode);
        let mut again = source.clone();
        reused.apply(&mut again, 31, 12, 3, mode);

        assert_eq!(fresh, again, "{mode} depends on previous calls");
    }
}

#[test]
fn threshold_maps_only_look_at_the_pixel_itself() {
    for mode in [DitherMode::Ordered, DitherMode::BlueNoise] {
        let source = noise(16, 16, 3);
        let mut base = source.clone();
        Quantizer::new().apply(&mut base, 16, 16, 2, mode);

        let mut changed = source.clone();
        let target = (5 * 16 + 9) * 4;
        changed[target] = changed[target].wrapping_add(97);
        Quantizer::new().apply(&mut changed, 16, 16, 2, mode);

        for (idx, (a, b)) in base.chunks_exact(4).zip(changed.chunks_exact(4)).enumerate() {
            if idx * 4 != target {
                assert_eq!(a, b, "{mode}: pixel {idx} changed");
            }
        }
    }
}

#[test]
fn atkinson_pushes_one_eighth_to_the_right() {
    // 40 quantizes to 0 at two bits, leaving 40 of error; 1/8 of it is exactly 5.
    let mut below = gray_row(&[40, 37]);
    Quantizer::new().apply(&mut below, 2, 1, 2, DitherMode::Atkinson);
    assert_eq!(below, gray_row(&[0, 0]));

    let mut crossing = gray_row(&[40, 38]);
    Quantizer::new().apply(&mut crossing, 2, 1, 2, DitherMode::Atkinson);
    assert_eq!(crossing, gray_row(&[0, 85]));
}
