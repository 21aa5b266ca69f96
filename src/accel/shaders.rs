//! WGSL compute shaders for the GPU backend

/// Placeholder replaced by the configured workgroup size.
const WORKGROUP_SIZE_TOKEN: &str = "{{WORKGROUP_SIZE}}";

/// Pixel classification kernel (WGSL)
///
/// One invocation per pixel. The flat `RGBRGB...` buffer is bound as
/// `array<u32>` and unpacked byte by byte (storage is little-endian).
///
/// Counters are 64-bit values stored as `[lo, hi]` word pairs: slot 0 is
/// BLACK, slot 1 is WHITE. The invocation whose `atomicAdd` wraps `lo`
/// carries into `hi`, so exactly one carry happens per wrap.
///
/// Large launches fold into a 2D grid; `row_pitch` is the number of
/// invocations per grid row and indices past `pixel_count` exit early.
const CLASSIFY_SHADER: &str = r#"
struct LaunchParams {
    pixel_count: u32,
    row_pitch: u32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<storage, read> pixels: array<u32>;
@group(0) @binding(1) var<storage, read_write> counters: array<atomic<u32>>;
@group(0) @binding(2) var<uniform> params: LaunchParams;

fn load_byte(offset: u32) -> u32 {
    return (pixels[offset >> 2u] >> ((offset & 3u) * 8u)) & 0xffu;
}

fn bump(slot: u32) {
    let lo = slot * 2u;
    let old = atomicAdd(&counters[lo], 1u);
    if (old == 0xffffffffu) {
        _ = atomicAdd(&counters[lo + 1u], 1u);
    }
}

@compute @workgroup_size({{WORKGROUP_SIZE}})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let k = gid.y * params.row_pitch + gid.x;
    if (k >= params.pixel_count) {
        return;
    }

    let base = k * 3u;
    let r = f32(load_byte(base));
    let g = f32(load_byte(base + 1u));
    let b = f32(load_byte(base + 2u));

    // Same constants and order as the host classifier; u32() truncates.
    let l = u32(r * 0.3 + g * 0.59 + b * 0.11);
    if (l == 0u) {
        bump(0u);
    } else if (l == 255u) {
        bump(1u);
    }
}
"#;

/// Entry point name of [`classify_shader`].
pub const CLASSIFY_ENTRY_POINT: &str = "main";

/// 32-bit words per logical counter slot (`lo`, `hi`).
pub const WORDS_PER_COUNTER: usize = 2;

/// Render the classification kernel for a given workgroup size.
pub fn classify_shader(workgroup_size: u32) -> String {
    CLASSIFY_SHADER.replace(WORKGROUP_SIZE_TOKEN, &workgroup_size.to_string())
}
