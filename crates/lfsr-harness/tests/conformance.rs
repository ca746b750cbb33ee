#![forbid(unsafe_code)]
//! End-to-end conformance: build an image with the producer, then decode
//! it back and require the reconstructed filesystem to match what was
//! written, byte for byte.

use lfsr_block::BlockStore;
use lfsr_core::{MountedImage, NodeKind, read_content};
use lfsr_error::LfsrError;
use lfsr_harness::{ImageBuilder, raw_image, superblock_writer};
use lfsr_recover::{recover_by_name, scan_image};
use lfsr_types::Revision;

#[test]
fn sample_image_round_trips() {
    let mounted = MountedImage::mount(ImageBuilder::sample().into_store().expect("store"))
        .expect("mount");

    let summary = mounted.summary();
    assert_eq!(summary.superblock.version_major, 2);
    assert_eq!(summary.superblock.block_size, 512);
    assert_eq!(summary.superblock.block_count, 256);

    let tree = mounted.tree().expect("tree");
    let names: Vec<&str> = tree
        .root
        .children
        .iter()
        .map(|node| node.name.as_str())
        .collect();
    assert_eq!(names, vec!["config", "first-file.txt", "logs", "temp"]);

    for (path, expected) in [
        ("/first-file.txt", b"This is the root file\n".as_slice()),
        ("/config/system.conf", b"system=true\nversion=2.0\n"),
        ("/config/network.conf", b"ip=192.168.1.1\nmask=255.255.255.0\n"),
        ("/logs/boot.log", b"Boot successful at 12:34PM\n"),
    ] {
        assert_eq!(
            mounted.read_path(path).unwrap_or_else(|err| panic!("{path}: {err}")),
            expected,
            "content mismatch for {path}"
        );
    }
}

#[test]
fn unlinked_file_is_gone_from_the_tree_but_recoverable() {
    let mounted = MountedImage::mount(ImageBuilder::sample().into_store().expect("store"))
        .expect("mount");

    let tree = mounted.tree().expect("tree");
    assert!(tree.find("/temp/to-be-deleted.txt").is_none());
    assert_eq!(tree.find("/temp").expect("temp dir").children.len(), 0);

    let fragment = recover_by_name(mounted.store(), b"to-be-deleted.txt")
        .expect("carve should find the orphaned name record");
    assert_eq!(fragment.data, b"This file will be deleted\n");
}

#[test]
fn recovery_needs_no_superblock() {
    // A bare image with one orphaned trace and no filesystem at all.
    let mut builder = ImageBuilder::new(512, 16);
    let root = builder.root();
    builder.orphan_inline(root, "secret.bin", b"\x01\x02\x03stale");
    let mut image = builder.build();
    // Destroy the magic; mounting must fail, carving must not.
    image[8..16].fill(0);
    let store = BlockStore::new(image, 512).expect("store");

    assert!(matches!(
        MountedImage::mount(store.clone()).expect_err("no superblock"),
        LfsrError::NoSuperblock
    ));
    let fragment = recover_by_name(&store, b"secret.bin").expect("fragment");
    assert_eq!(fragment.data, b"\x01\x02\x03stale");
}

#[test]
fn geometry_mismatch_fails_before_any_decoding() {
    let mut image = ImageBuilder::sample().build();
    image.truncate(image.len() - 100);
    assert!(matches!(
        BlockStore::new(image, 512).expect_err("geometry"),
        LfsrError::Geometry(_)
    ));
}

#[test]
fn mirror_with_higher_revision_is_authoritative() {
    let stale = superblock_writer(512, Revision(4), 64);
    let fresh = superblock_writer(512, Revision(7), 64);
    let image = raw_image(512, &[(0, stale.finish()), (1, fresh.finish())], 64);
    let mounted =
        MountedImage::mount(BlockStore::new(image, 512).expect("store")).expect("mount");
    assert_eq!(mounted.summary().block, lfsr_types::BlockIndex(1));
    assert_eq!(mounted.summary().revision, Revision(7));
}

#[test]
fn skip_list_files_round_trip_alongside_inline_files() {
    let big: Vec<u8> = (0..5000_u32).map(|i| (i * 7 % 256) as u8).collect();
    let mut builder = ImageBuilder::new(512, 64);
    let root = builder.root();
    builder.write_inline(root, "small.txt", b"inline");
    builder.write_ctz(root, "big.bin", &big);

    let mounted = MountedImage::mount(builder.into_store().expect("store")).expect("mount");
    let tree = mounted.tree().expect("tree");

    let small = tree.find("/small.txt").expect("small");
    assert_eq!(small.kind, NodeKind::File);
    assert_eq!(small.size, Some(6));

    let node = tree.find("/big.bin").expect("big");
    assert_eq!(node.size, Some(5000));
    let content = read_content(
        mounted.store(),
        node.file_struct.as_ref().expect("struct"),
    )
    .expect("read");
    assert_eq!(content, big);
}

#[test]
fn scan_sees_orphaned_records_the_tree_does_not() {
    let store = ImageBuilder::sample().into_store().expect("store");
    let scans = scan_image(&store);

    let orphan_sightings: Vec<_> = scans
        .iter()
        .flat_map(|block| &block.records)
        .filter(|record| record.detail.as_deref() == Some("to-be-deleted.txt"))
        .collect();
    assert_eq!(orphan_sightings.len(), 1);
}
