// Licensed under the Apache-2.0 license

use tbf_image::{
    BoardConfig, TabApp, TabVariant, TbfError, TbfFlag, TbfHeader, TbfHeaderBuilder, VariantIndex,
};

// Program TLV (24) + a 17 byte package name padded to 20 (24) + base (16).
const PACKAGE_NAME: &str = "c_hello_world_app";

fn header_512() -> TbfHeader {
    let mut header = TbfHeaderBuilder::new()
        .package_name(PACKAGE_NAME)
        .init_fn_offset(0x29)
        .minimum_ram_size(0x1000)
        .build(100)
        .unwrap();
    header.set_app_size(512);
    header
}

fn app_512() -> TabApp {
    let variant =
        TabVariant::new(header_512(), Some(vec![0x5A; 100])).with_architecture("cortex-m4");
    let mut app = TabApp::new(PACKAGE_NAME, vec![variant]);
    app.select(&VariantIndex(0)).unwrap();
    app
}

#[test]
fn test_declared_size_without_padding() {
    let app = app_512();
    assert_eq!(app.header_size().unwrap(), 64);
    assert_eq!(app.size().unwrap(), 512);

    let image = app.binary().unwrap();
    assert_eq!(image.len(), 164);
    assert_eq!(&image[..64], app.header_bytes().unwrap().as_slice());
    assert!(image[64..].iter().all(|b| *b == 0x5A));
}

#[test]
fn test_set_size_below_content() {
    let mut app = app_512();
    assert_eq!(
        app.set_size(100),
        Err(TbfError::Size {
            requested: 100,
            minimum: 164
        })
    );
    assert_eq!(app.size().unwrap(), 512);
    assert!(!app.is_modified());
}

#[test]
fn test_set_size_boundary() {
    for size in [0, 1, 63, 64, 163] {
        let mut app = app_512();
        assert!(matches!(app.set_size(size), Err(TbfError::Size { .. })));
        assert_eq!(app.size().unwrap(), 512);
    }
    for size in [164, 165, 256, 512, 0x10000, u32::MAX] {
        let mut app = app_512();
        app.set_size(size).unwrap();
        assert_eq!(app.size().unwrap(), size);
        assert_eq!(app.app_binary().unwrap(), &[0x5A; 100][..]);
    }
}

#[test]
fn test_binary_never_exceeds_size() {
    let mut app = app_512();
    app.set_app_binary(vec![0x11; 1000]).unwrap();
    assert_eq!(app.binary().unwrap().len(), 512);

    app.set_size(1064).unwrap();
    assert_eq!(app.binary().unwrap().len(), 1064);

    app.set_app_binary(vec![0x22; 10]).unwrap();
    assert_eq!(app.binary().unwrap().len(), 74);

    app.set_sticky();
    app.set_address(0x40000);
    assert!(app.binary().unwrap().len() as u32 <= app.size().unwrap());
}

#[test]
fn test_set_sticky_all_variants() {
    let plain = TbfHeaderBuilder::new()
        .package_name("blink")
        .build(16)
        .unwrap();
    let mut flagged = plain.clone();
    flagged.set_flag(TbfFlag::Sticky, true);
    let mut app = TabApp::new(
        "blink",
        vec![
            TabVariant::new(plain.clone(), None).with_architecture("cortex-m0"),
            TabVariant::new(flagged, None).with_architecture("cortex-m4"),
            TabVariant::new(plain, Some(vec![0; 16])).with_architecture("rv32imc"),
        ],
    );
    app.set_sticky();
    assert!(app.is_modified());
    assert!(app.variants().iter().all(|v| v.header().is_sticky()));
}

#[test]
fn test_flash_image_round_trip() {
    let app = app_512();
    let image = app.binary().unwrap();
    let header = TbfHeader::parse(&image).unwrap();
    assert_eq!(header.to_bytes().unwrap(), &image[..64]);
    assert_eq!(header.package_name(), Some(PACKAGE_NAME));
    assert_eq!(header.app_size(), 512);

    let variant = TabVariant::from_tbf_bytes(&image).unwrap();
    assert_eq!(variant.binary(), Some(&image[64..]));
}

#[test]
fn test_crt0_header_str() {
    let mut app = app_512();
    app.set_app_binary(vec![0; 100]).unwrap();
    let out = app.crt0_header_str().unwrap();
    assert_eq!(out.lines().count(), 10);
    for line in out.lines() {
        assert!(line.ends_with(":          0          0x0"), "{line}");
    }
    assert!(out.starts_with("got_sym_start       :"));
}

#[test]
fn test_board_selection() {
    let board = BoardConfig::from_toml_str(
        r#"
name = "nrf52840dk"
arch = "cortex-m4"
app_address = 0x40000
size_constraint = "powers_of_two"
"#,
    )
    .unwrap();
    let m0 = TabVariant::new(header_512(), Some(vec![0; 100])).with_architecture("cortex-m0");
    let m4 = TabVariant::new(header_512(), Some(vec![1; 100])).with_architecture("cortex-m4");
    let mut app = TabApp::new(PACKAGE_NAME, vec![m0, m4]);
    assert_eq!(app.size(), Err(TbfError::NoVariantSelected));

    assert_eq!(app.select(&board).unwrap(), 1);
    assert_eq!(app.active_variant().unwrap().architecture(), Some("cortex-m4"));
    assert_eq!(app.fit_to_board(&board).unwrap(), 256);
    assert_eq!(app.binary().unwrap().len(), 164);

    let mut riscv_only = TabApp::new(
        PACKAGE_NAME,
        vec![TabVariant::new(header_512(), None).with_architecture("rv32imc")],
    );
    assert_eq!(riscv_only.select(&board), Err(TbfError::NoVariantSelected));
}
