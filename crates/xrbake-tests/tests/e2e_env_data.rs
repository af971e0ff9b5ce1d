//! End-to-end tests for environment data baking.
//!
//! Every test runs on the CPU executor.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p xrbake-tests --test e2e_env_data
//! ```

use std::fs;

use pretty_assertions::assert_eq;
use xrbake_backend_ibl::executor::specular_regions;
use xrbake_backend_ibl::rgbd::decode_u8;
use xrbake_backend_ibl::{
    bake_env_data, unpack_env_data, CpuExecutor, EnvDataOptions, EnvDataOutput, EnvDescriptor,
    IblRenderer, MapRef, SkyboxFormat, WarningCode,
};
use xrbake_tests::fixtures::{constant_hdr_panorama, srgb_panorama};

/// Y00 times the full sphere: DC coefficient of a unit constant panorama.
const DC_PER_UNIT: f32 = 0.282_095 * 4.0 * std::f32::consts::PI;

#[test]
fn test_srgb_panorama_to_half_size_skybox() {
    let panorama = srgb_panorama(2048, 1024);
    let options = EnvDataOptions {
        skybox_size: 1024,
        ..EnvDataOptions::default()
    };
    let mut renderer = IblRenderer::new(CpuExecutor::new());

    let result = bake_env_data(&mut renderer, &panorama, &options).unwrap();
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);

    let EnvDataOutput::Files {
        descriptor,
        skybox_name,
        skybox,
        specular,
    } = result.output
    else {
        panic!("expected loose files");
    };
    assert_eq!(skybox_name, "skybox.jpg");

    let skybox = image::load_from_memory_with_format(&skybox, image::ImageFormat::Jpeg).unwrap();
    assert_eq!((skybox.width(), skybox.height()), (1024, 512));
    assert_eq!(skybox.width(), 2 * skybox.height());

    let specular = image::load_from_memory_with_format(&specular, image::ImageFormat::Png)
        .unwrap()
        .to_rgba8();
    assert_eq!(specular.dimensions(), (256, 256));
    assert_eq!(descriptor.specular.mipmap_count, 5);
    assert!(descriptor.specular.mipmaps);
    assert!(!descriptor.specular.rgbd);
    assert_eq!(descriptor.skybox.map, MapRef::Path("skybox.jpg".to_string()));

    // Five levels stacked vertically, each half the size of the previous.
    let regions = specular_regions(256, 5);
    assert_eq!(regions.len(), 5);
    for pair in regions.windows(2) {
        assert_eq!(pair[1].y, pair[0].y + pair[0].height);
        assert_eq!(pair[1].width * 2, pair[0].width);
    }
    // Space below the cascade stays white.
    let last = regions[4];
    assert_eq!(specular.get_pixel(255, last.y + last.height).0, [255; 4]);
    // Mips are opaque.
    assert_eq!(specular.get_pixel(10, 10).0[3], 255);
}

#[test]
fn test_hdr_panorama_packs_rgbd_specular() {
    let panorama = constant_hdr_panorama(64, 32, [4.0, 2.0, 1.0]);
    let options = EnvDataOptions {
        skybox_size: 64,
        specular_size: 32,
        binary_pack: true,
        skybox_format: SkyboxFormat::Png,
        ..EnvDataOptions::default()
    };
    let mut renderer = IblRenderer::new(CpuExecutor::new());

    let result = bake_env_data(&mut renderer, &panorama, &options).unwrap();
    let EnvDataOutput::Packed(bytes) = &result.output else {
        panic!("expected packed output");
    };
    assert_eq!(&bytes[..8], b"wxxr-env");

    let packed = unpack_env_data(bytes).unwrap();
    assert!(packed.descriptor.specular.rgbd);
    match &packed.descriptor.skybox.map {
        MapRef::Range { mime, .. } => assert_eq!(mime, "image/png"),
        other => panic!("expected byte range, got {:?}", other),
    }

    let specular = packed.map_bytes(&packed.descriptor.specular.map).unwrap();
    let specular = image::load_from_memory_with_format(specular, image::ImageFormat::Png)
        .unwrap()
        .to_rgba8();
    assert_eq!(specular.dimensions(), (32, 32));
    // Center of mip 0 decodes back to the source radiance.
    let decoded = decode_u8(specular.get_pixel(8, 4).0);
    for (got, want) in decoded.iter().zip([4.0f32, 2.0, 1.0]) {
        assert!((got - want).abs() / want < 0.02, "{:?}", decoded);
    }

    // A constant panorama only has a DC term.
    let sh = result.sh.0;
    for (c, want) in [4.0f32, 2.0, 1.0].iter().enumerate() {
        assert!((sh[0][c] - want * DC_PER_UNIT).abs() < 1e-2, "{:?}", sh[0]);
    }
    for band in &sh[1..4] {
        for v in band {
            assert!(v.abs() < 1e-3, "{:?}", band);
        }
    }
}

#[test]
fn test_non_power_of_two_sizes_are_rounded() {
    let panorama = srgb_panorama(64, 32);
    let options = EnvDataOptions {
        skybox_size: 100,
        specular_size: 50,
        ..EnvDataOptions::default()
    };
    let mut renderer = IblRenderer::new(CpuExecutor::new());

    let result = bake_env_data(&mut renderer, &panorama, &options).unwrap();
    let rounded = result
        .warnings
        .iter()
        .filter(|w| w.code == WarningCode::SizeRounded)
        .count();
    assert_eq!(rounded, 2);

    let EnvDataOutput::Files { skybox, specular, .. } = result.output else {
        panic!("expected loose files");
    };
    let skybox = image::load_from_memory(&skybox).unwrap();
    assert_eq!((skybox.width(), skybox.height()), (128, 64));
    let specular = image::load_from_memory(&specular).unwrap();
    assert_eq!((specular.width(), specular.height()), (64, 64));
}

#[test]
fn test_renderer_reuses_targets_across_panoramas() {
    let options = EnvDataOptions {
        skybox_size: 32,
        specular_size: 16,
        ..EnvDataOptions::default()
    };
    let mut renderer = IblRenderer::new(CpuExecutor::new());

    bake_env_data(&mut renderer, &srgb_panorama(32, 16), &options).unwrap();
    let after_first = renderer.executor().pool_hits();
    bake_env_data(&mut renderer, &srgb_panorama(32, 16), &options).unwrap();

    assert!(renderer.executor().pool_hits() > after_first);
    assert_eq!(renderer.executor().live_textures(), 0);
}

#[test]
fn test_cli_bakes_panorama_directory() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("panoramas");
    fs::create_dir_all(&input).unwrap();
    for name in ["dawn.png", "dusk.jpg"] {
        image::RgbImage::from_fn(64, 32, |x, y| image::Rgb([x as u8 * 4, y as u8 * 8, 120]))
            .save(input.join(name))
            .unwrap();
    }
    fs::write(input.join("notes.txt"), b"not a panorama").unwrap();
    let out = dir.path().join("out");
    let options = EnvDataOptions {
        skybox_size: 64,
        specular_size: 32,
        ..EnvDataOptions::default()
    };

    let mut renderer = IblRenderer::new(CpuExecutor::new());
    xrbake_cli::commands::env_data::run_with(
        &mut renderer,
        input.to_str().unwrap(),
        out.to_str().unwrap(),
        &options,
    )
    .unwrap();

    for stem in ["dawn", "dusk"] {
        let descriptor: EnvDescriptor =
            serde_json::from_slice(&fs::read(out.join(stem).join("data.json")).unwrap()).unwrap();
        assert_eq!(descriptor.specular.mipmap_count, 5);
        assert!(out.join(stem).join("skybox.jpg").is_file());
        assert!(out.join(stem).join("specular.png").is_file());
    }
    assert!(!out.join("notes").exists());
}
