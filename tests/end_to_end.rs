use std::fs;
use std::io::{Read, Write};

use tempfile::TempDir;
use walkdir::WalkDir;
use zipbridge::write::{EntryOptions, ZipWriter};
use zipbridge::{CompressionMethod, ZipArchive};

const FILE_ONE: &str = "File 1 content";
const FILE_TWO: &str = "File 2 content";

fn build_tree(root: &TempDir) {
    let base = root.path();
    fs::create_dir_all(base.join("root/subdir")).unwrap();
    fs::write(base.join("root/file1.txt"), FILE_ONE).unwrap();
    fs::write(base.join("root/subdir/file2.txt"), FILE_TWO).unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink("file1.txt", base.join("root/link1")).unwrap();
}

fn archive_tree(root: &TempDir) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer.add_path("root", root.path()).unwrap();
    writer.add_path("root/file1.txt", root.path()).unwrap();
    writer.add_path("root/subdir", root.path()).unwrap();
    writer.add_path("root/subdir/file2.txt", root.path()).unwrap();
    #[cfg(unix)]
    writer.add_path("root/link1", root.path()).unwrap();
    writer.finish().unwrap().into_inner()
}

#[test]
fn record_signatures_are_on_disk() {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file(
            "a.txt",
            EntryOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
    writer.write_all(b"abc").unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    // Local file header leads the archive.
    assert_eq!(&bytes[..4], b"PK\x03\x04");
    // A central directory record and the end record follow the data.
    let cd = bytes
        .windows(4)
        .position(|w| w == b"PK\x01\x02")
        .expect("central directory record missing");
    let eocd = bytes
        .windows(4)
        .position(|w| w == b"PK\x05\x06")
        .expect("end of central directory record missing");
    assert!(cd < eocd);
}

#[test]
fn archive_lists_entries_in_insertion_order() {
    let source = TempDir::new().unwrap();
    build_tree(&source);
    let bytes = archive_tree(&source);

    let archive = ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let names: Vec<_> = archive.file_names().collect();
    assert_eq!(&names[..4], &[
        "root/",
        "root/file1.txt",
        "root/subdir/",
        "root/subdir/file2.txt",
    ]);

    // Byte-exact lookup: directories only answer to their slashed name.
    assert!(archive.entry("root").is_none());
    assert!(archive.entry("root/").is_some());
}

#[test]
fn extraction_reproduces_the_tree() {
    let source = TempDir::new().unwrap();
    build_tree(&source);
    let bytes = archive_tree(&source);

    let destination = TempDir::new().unwrap();
    let mut archive = ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    archive.extract(destination.path()).unwrap();

    let mut extracted: Vec<String> = WalkDir::new(destination.path())
        .min_depth(1)
        .into_iter()
        .map(|e| {
            let entry = e.unwrap();
            entry
                .path()
                .strip_prefix(destination.path())
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    extracted.sort();

    #[cfg(unix)]
    let expected = vec![
        "root",
        "root/file1.txt",
        "root/link1",
        "root/subdir",
        "root/subdir/file2.txt",
    ];
    #[cfg(not(unix))]
    let expected = vec!["root", "root/file1.txt", "root/subdir", "root/subdir/file2.txt"];
    assert_eq!(extracted, expected);

    assert_eq!(
        fs::read_to_string(destination.path().join("root/file1.txt")).unwrap(),
        FILE_ONE
    );
    assert_eq!(
        fs::read_to_string(destination.path().join("root/subdir/file2.txt")).unwrap(),
        FILE_TWO
    );

    #[cfg(unix)]
    {
        let target = fs::read_link(destination.path().join("root/link1")).unwrap();
        assert_eq!(target, std::path::PathBuf::from("file1.txt"));
    }
}

#[cfg(unix)]
#[test]
fn extraction_restores_posix_modes() {
    use std::os::unix::fs::PermissionsExt;

    let source = TempDir::new().unwrap();
    let asset = source.path().join("tool.sh");
    fs::write(&asset, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&asset, fs::Permissions::from_mode(0o750)).unwrap();

    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer.add_path("tool.sh", source.path()).unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let destination = TempDir::new().unwrap();
    let mut archive = ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    archive.extract(destination.path()).unwrap();

    let mode = fs::metadata(destination.path().join("tool.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o7777, 0o750);
}

#[test]
fn append_mode_through_a_file_handle() {
    let dir = TempDir::new().unwrap();
    let zip_path = dir.path().join("grow.zip");
    let stored = EntryOptions::default().compression_method(CompressionMethod::Stored);

    let mut writer = ZipWriter::new(fs::File::create(&zip_path).unwrap());
    writer.start_file("first.txt", stored).unwrap();
    writer.write_all(b"one").unwrap();
    writer.finish().unwrap();

    let reopened = fs::File::options()
        .read(true)
        .write(true)
        .open(&zip_path)
        .unwrap();
    let mut writer = ZipWriter::new_append(reopened).unwrap();
    writer.start_file("second.txt", stored).unwrap();
    writer.write_all(b"two").unwrap();
    writer.finish().unwrap();

    let mut archive = ZipArchive::new(fs::File::open(&zip_path).unwrap()).unwrap();
    assert_eq!(archive.len(), 2);
    let mut contents = String::new();
    archive
        .by_name("first.txt")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "one");
    contents.clear();
    archive
        .by_name("second.txt")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "two");
}

#[test]
fn prepended_garbage_is_tolerated() {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file(
            "data.txt",
            EntryOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
    writer.write_all(b"payload").unwrap();
    let zip_bytes = writer.finish().unwrap().into_inner();

    let mut padded = vec![0xa5u8; 100];
    padded.extend_from_slice(&zip_bytes);

    let mut archive = ZipArchive::new(std::io::Cursor::new(padded)).unwrap();
    assert_eq!(archive.offset(), 100);
    let mut contents = String::new();
    archive
        .by_name("data.txt")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "payload");
}

#[test]
fn corrupted_data_fails_the_crc_check() {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file(
            "data.txt",
            EntryOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
    writer.write_all(b"payload").unwrap();
    let mut bytes = writer.finish().unwrap().into_inner();

    // Flip a byte inside the stored data without touching the headers.
    let pos = bytes
        .windows(7)
        .position(|w| w == b"payload")
        .expect("stored data missing");
    bytes[pos] ^= 0xff;

    let mut archive = ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut contents = Vec::new();
    let err = archive
        .by_name("data.txt")
        .unwrap()
        .read_to_end(&mut contents)
        .unwrap_err();
    assert!(err.to_string().contains("Invalid checksum"));
}

#[test]
fn truncated_archives_are_unreadable() {
    let err = ZipArchive::new(std::io::Cursor::new(vec![0u8; 3])).unwrap_err();
    assert!(matches!(err, zipbridge::ZipError::InvalidArchive(_)));

    let err = ZipArchive::new(std::io::Cursor::new(vec![0u8; 4096])).unwrap_err();
    assert!(matches!(err, zipbridge::ZipError::InvalidArchive(_)));
}
