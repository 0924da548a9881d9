//! Round-trip and error-path tests for the `.mgs` container.

use mgs::{decode_bytes, decode_file, encode, pack, Error, GaussianCloud, SceneMetadata};

/// A small degree-1 cloud with non-trivial values in every channel.
fn test_cloud(dynamic: bool) -> GaussianCloud {
    let means = [
        0.5, -1.0, 2.0, //
        3.0, 0.25, -0.75, //
        -2.0, 1.5, 0.0,
    ];
    let scales = [
        0.1, 0.2, 0.3, //
        0.5, 0.5, 0.5, //
        1.0, 0.25, 0.125,
    ];
    let rotations = [
        1.0, 0.0, 0.0, 0.0, //
        0.9238795, 0.0, 0.3826834, 0.0, //
        0.7071068, 0.7071068, 0.0, 0.0,
    ];
    let opacities = [1.0, 0.5, 0.25];

    // 4 coefficients (degree 1) x 3 channels per gaussian.
    let shs: Vec<f32> = (0..3 * 4 * 3).map(|i| (i as f32) * 0.05 - 0.8).collect();

    let velocities = [0.1, 0.0, -0.1, 0.0, 0.2, 0.0, -0.3, 0.1, 0.0];
    let t_means = [0.1, 0.5, 0.9];
    let t_stdevs = [0.05, 0.1, 0.2];
    let dynamics = dynamic.then_some(mgs::DynamicArrays {
        velocities: &velocities,
        t_means: &t_means,
        t_stdevs: &t_stdevs,
    });

    GaussianCloud::from_arrays(&means, &scales, &rotations, &opacities, &shs, dynamics).unwrap()
}

#[test]
fn encode_decode_roundtrip_preserves_everything() {
    let packed = pack(&test_cloud(false)).unwrap();
    let metadata = SceneMetadata { duration: 2.5 };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.mgs");

    encode(&packed, metadata, &path).unwrap();
    let (decoded, decoded_metadata) = decode_file(&path).unwrap();

    assert_eq!(decoded, packed);
    assert_eq!(decoded_metadata, metadata);
}

#[test]
fn dynamic_roundtrip_preserves_velocities() {
    let packed = pack(&test_cloud(true)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dynamic.mgs");

    encode(&packed, SceneMetadata { duration: 10.0 }, &path).unwrap();
    let (decoded, _) = decode_file(&path).unwrap();

    assert!(decoded.is_dynamic());
    assert_eq!(decoded.velocities(), packed.velocities());
    assert_eq!(decoded, packed);
}

#[test]
fn reencoding_a_decoded_file_is_byte_identical() {
    let packed = pack(&test_cloud(false)).unwrap();
    let metadata = SceneMetadata { duration: 0.0 };

    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.mgs");
    let second = dir.path().join("second.mgs");

    encode(&packed, metadata, &first).unwrap();
    let (decoded, decoded_metadata) = decode_file(&first).unwrap();
    encode(&decoded, decoded_metadata, &second).unwrap();

    let a = std::fs::read(&first).unwrap();
    let b = std::fs::read(&second).unwrap();
    assert_eq!(a, b);
}

#[test]
fn buffer_and_file_decoding_agree() {
    let packed = pack(&test_cloud(true)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.mgs");
    encode(&packed, SceneMetadata::default(), &path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let (from_file, m1) = decode_file(&path).unwrap();
    let (from_buffer, m2) = decode_bytes(&bytes).unwrap();

    assert_eq!(from_file, from_buffer);
    assert_eq!(m1, m2);
}

#[test]
fn negative_duration_is_a_warning_not_an_error() {
    let packed = pack(&test_cloud(false)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.mgs");
    encode(&packed, SceneMetadata { duration: -1.0 }, &path).unwrap();

    let (_, metadata) = decode_file(&path).unwrap();
    assert_eq!(metadata.duration, -1.0);
}

/// Build valid container bytes to corrupt in the error-path tests.
fn valid_bytes() -> Vec<u8> {
    let packed = pack(&test_cloud(false)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.mgs");
    encode(&packed, SceneMetadata::default(), &path).unwrap();

    std::fs::read(&path).unwrap()
}

// Byte offsets within the container header.
const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_COUNT: usize = 12;
const OFF_COLOR_MIN: usize = 21;
const OFF_SH_MIN: usize = 29;

fn patch_f32(bytes: &mut [u8], offset: usize, value: f32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn bad_magic_is_invalid_input() {
    let mut bytes = valid_bytes();
    bytes[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(b"nope");

    assert!(matches!(decode_bytes(&bytes), Err(Error::InvalidInput(_))));
}

#[test]
fn mismatched_version_is_invalid_input() {
    let mut bytes = valid_bytes();
    // MAKE_VERSION(0, 0, 2)
    bytes[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&2u32.to_le_bytes());

    assert!(matches!(decode_bytes(&bytes), Err(Error::InvalidInput(_))));
}

#[test]
fn zero_count_is_invalid_input() {
    let mut bytes = valid_bytes();
    bytes[OFF_COUNT..OFF_COUNT + 4].copy_from_slice(&0u32.to_le_bytes());

    assert!(matches!(decode_bytes(&bytes), Err(Error::InvalidInput(_))));
}

#[test]
fn inverted_color_range_is_invalid_input() {
    let mut bytes = valid_bytes();
    patch_f32(&mut bytes, OFF_COLOR_MIN, 1.0);
    patch_f32(&mut bytes, OFF_COLOR_MIN + 4, 0.0);

    assert!(matches!(decode_bytes(&bytes), Err(Error::InvalidInput(_))));
}

#[test]
fn inverted_sh_range_is_invalid_input() {
    let mut bytes = valid_bytes();
    patch_f32(&mut bytes, OFF_SH_MIN, 1.0);
    patch_f32(&mut bytes, OFF_SH_MIN + 4, -1.0);

    assert!(matches!(decode_bytes(&bytes), Err(Error::InvalidInput(_))));
}

#[test]
fn truncated_buffer_is_invalid_input() {
    let bytes = valid_bytes();

    // Only the file header and metadata survive.
    assert!(matches!(
        decode_bytes(&bytes[..16]),
        Err(Error::InvalidInput(_))
    ));

    // Truncation in the middle of the payload as well.
    assert!(matches!(
        decode_bytes(&bytes[..bytes.len() - 1]),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn truncated_file_is_a_read_error() {
    let bytes = valid_bytes();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.mgs");
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    assert!(matches!(decode_file(&path), Err(Error::FileRead(_))));
}

#[test]
fn missing_file_is_an_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.mgs");

    assert!(matches!(decode_file(&path), Err(Error::FileOpen(_))));
}

#[test]
fn failed_encode_leaves_no_file_behind() {
    let packed = pack(&test_cloud(false)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing-dir").join("scene.mgs");

    assert!(matches!(
        encode(&packed, SceneMetadata::default(), &path),
        Err(Error::FileOpen(_))
    ));
    assert!(!path.exists());
}
