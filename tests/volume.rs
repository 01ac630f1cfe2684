use fat_repair::filesystem::fat_entry::FatEntry;
use fat_repair::{DirCursor, FATError, FATVol, FormatOptions, VolumeConfig, format_volume};
use std::io::Cursor;

type MemVol = FATVol<Cursor<Vec<u8>>>;

fn image(options: FormatOptions) -> Cursor<Vec<u8>> {
    let mut store = Cursor::new(vec![]);
    format_volume(&mut store, &options).unwrap();
    store
}

fn volume() -> (MemVol, DirCursor) {
    let mut vol = FATVol::from_store(image(FormatOptions::default()), true, VolumeConfig::default())
        .unwrap();
    let cwd = vol.root_cursor().unwrap();
    (vol, cwd)
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn read_all(vol: &mut MemVol, cwd: &DirCursor, path: &str) -> Vec<u8> {
    let entry = vol.resolve(cwd, path).unwrap();
    vol.read_file(&entry)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
        .concat()
}

#[test]
fn fresh_volume_is_consistent() {
    let (mut vol, cwd) = volume();
    assert!(cwd.entries().is_empty());
    assert!(vol.check().unwrap().is_empty());
}

#[test]
fn file_in_directory_reads_back() {
    let (mut vol, mut root) = volume();
    let data = content(3 * vol.cluster_size() as usize + 100);

    let dir = vol.create_dir(&mut root, "A").unwrap();
    let mut cwd = vol.change_dir(&dir).unwrap();
    let file = vol.write_new_file(&mut cwd, "B", data.as_slice()).unwrap();

    assert_eq!(file.size() as usize, data.len());
    assert_eq!(vol.walk(file.start()).unwrap().len(), 4);
    assert_eq!(read_all(&mut vol, &root, "/A/B"), data);
    assert_eq!(read_all(&mut vol, &cwd, "B"), data);
    assert!(vol.check().unwrap().is_empty());
}

#[test]
fn file_chunks_follow_clusters() {
    let (mut vol, mut cwd) = volume();
    let size = vol.cluster_size() as usize;
    let file = vol
        .write_new_file(&mut cwd, "data.bin", content(size + 10).as_slice())
        .unwrap();

    let lens: Vec<usize> = vol
        .read_file(&file)
        .unwrap()
        .map(|chunk| chunk.unwrap().len())
        .collect();
    assert_eq!(lens, vec![size, 10]);
}

#[test]
fn empty_stream_gives_empty_file() {
    let (mut vol, mut cwd) = volume();
    let free = vol.free_cluster_count().unwrap();

    let file = vol.write_new_file(&mut cwd, "empty", &[][..]).unwrap();
    assert_eq!((file.start(), file.size()), (0, 0));
    assert_eq!(vol.free_cluster_count().unwrap(), free);
    assert_eq!(vol.read_file(&file).unwrap().count(), 0);
    assert!(vol.check().unwrap().is_empty());
}

#[test]
fn full_volume_releases_partial_chain() {
    let mut vol = FATVol::from_store(
        image(FormatOptions::default().with_clusters(4)),
        true,
        VolumeConfig::default(),
    )
    .unwrap();
    let mut cwd = vol.root_cursor().unwrap();
    let free = vol.free_cluster_count().unwrap();

    let data = content(10 * vol.cluster_size() as usize);
    assert!(matches!(
        vol.write_new_file(&mut cwd, "big", data.as_slice()),
        Err(FATError::VolumeFull)
    ));
    assert_eq!(vol.free_cluster_count().unwrap(), free);
    assert!(cwd.entries().is_empty());
}

#[test]
fn names_round_trip_through_the_volume() {
    let (mut vol, mut cwd) = volume();
    let long = "long name ".repeat(25);
    let names = ["x", "Отчёт за год.docx", "写真", long.as_str()];

    for name in names {
        vol.create_file(&mut cwd, name, 0, 0).unwrap();
    }
    let root = vol.root().clone();
    let listed: Vec<String> = vol
        .list_dir(&root)
        .unwrap()
        .iter()
        .map(|entry| entry.name().clone())
        .collect();

    assert_eq!(listed, names);
    assert!(vol.check().unwrap().is_empty());
}

#[test]
fn directory_grows_when_full() {
    let (mut vol, mut root) = volume();
    let dir = vol.create_dir(&mut root, "many").unwrap();
    let mut cwd = vol.change_dir(&dir).unwrap();

    // 512-byte clusters hold 16 records, each entry takes 2
    for i in 0..20 {
        vol.create_file(&mut cwd, &format!("file{i}"), 0, 0).unwrap();
    }

    assert_eq!(vol.walk(dir.start()).unwrap().len(), 3);
    assert_eq!(cwd.children().count(), 20);
    assert!(vol.check().unwrap().is_empty());
}

#[test]
fn duplicate_names_are_refused() {
    let (mut vol, mut cwd) = volume();
    vol.create_dir(&mut cwd, "docs").unwrap();

    assert!(matches!(
        vol.create_file(&mut cwd, "docs", 0, 0),
        Err(FATError::AlreadyExists(name)) if name == "docs"
    ));
    assert!(matches!(
        vol.create_dir(&mut cwd, "docs"),
        Err(FATError::AlreadyExists(_))
    ));
}

#[test]
fn navigation() {
    let (mut vol, mut root) = volume();
    let a = vol.create_dir(&mut root, "a").unwrap();
    let mut in_a = vol.change_dir(&a).unwrap();
    let b = vol.create_dir(&mut in_a, "b").unwrap();
    vol.create_file(&mut in_a, "f", 0, 0).unwrap();

    let in_b = vol.change_dir(&b).unwrap();
    let names: Vec<&str> = in_b.entries().iter().map(|e| e.name().as_str()).collect();
    assert_eq!(names, [".", ".."]);

    // ".." of a/b leads back to a, ".." of a to the root
    let up = vol.change_dir(in_b.find("..").unwrap()).unwrap();
    assert_eq!(up.dir().start(), a.start());
    let top = vol.change_dir(in_a.find("..").unwrap()).unwrap();
    assert!(top.dir().is_root());

    assert_eq!(vol.resolve(&in_b, "../f").unwrap().name(), "f");
    assert_eq!(vol.resolve(&in_b, "/a/./b/..").unwrap().start(), a.start());
    assert!(vol.resolve(&root, "/..").unwrap().is_root());

    let file = in_a.find("f").unwrap().clone();
    assert!(matches!(
        vol.change_dir(&file),
        Err(FATError::NotADirectory(name)) if name == "f"
    ));
    assert!(matches!(vol.resolve(&root, "a/f/x"), Err(FATError::NotADirectory(_))));
    assert!(matches!(
        vol.resolve(&root, "missing"),
        Err(FATError::NotFound(name)) if name == "missing"
    ));
    assert!(matches!(vol.read_file(&a), Err(FATError::IsADirectory(_))));
}

#[test]
fn recursive_remove_frees_the_subtree() {
    let (mut vol, mut root) = volume();
    let free = vol.free_cluster_count().unwrap();

    let top = vol.create_dir(&mut root, "top").unwrap();
    let mut cwd = vol.change_dir(&top).unwrap();
    let nested = vol.create_dir(&mut cwd, "nested").unwrap();
    vol.write_new_file(&mut cwd, "one", content(1500).as_slice()).unwrap();
    let mut inner = vol.change_dir(&nested).unwrap();
    vol.write_new_file(&mut inner, "two", content(700).as_slice()).unwrap();

    let mut owned = vec![];
    for start in [top.start(), nested.start()] {
        owned.extend(vol.walk(start).unwrap());
    }
    for entry in [cwd.find("one").unwrap().clone(), inner.find("two").unwrap().clone()] {
        owned.extend(vol.walk(entry.start()).unwrap());
    }
    assert_eq!(owned.len(), 7);

    vol.remove(&mut root, &top).unwrap();

    for cluster in owned {
        assert_eq!(vol.fat_entry(cluster).unwrap(), FatEntry::Free);
    }
    assert_eq!(vol.free_cluster_count().unwrap(), free);
    assert!(root.entries().is_empty());
    assert!(vol.check().unwrap().is_empty());
}

#[test]
fn dot_entries_cannot_be_removed() {
    let (mut vol, mut root) = volume();
    let dir = vol.create_dir(&mut root, "d").unwrap();
    let mut cwd = vol.change_dir(&dir).unwrap();
    let dot = cwd.find(".").unwrap().clone();

    assert!(matches!(vol.remove(&mut cwd, &dot), Err(FATError::InvalidName(_))));
}

#[test]
fn read_only_volume_refuses_mutations() {
    let mut store = image(FormatOptions::default());
    {
        let mut vol = FATVol::from_store(&mut store, true, VolumeConfig::default()).unwrap();
        let mut cwd = vol.root_cursor().unwrap();
        vol.create_dir(&mut cwd, "kept").unwrap();
    }

    let config = VolumeConfig::default().with_read_only(true);
    let mut vol = FATVol::from_store(store, true, config).unwrap();
    let mut cwd = vol.root_cursor().unwrap();
    let kept = cwd.find("kept").unwrap().clone();

    assert!(!vol.is_writable());
    assert!(matches!(
        vol.create_file(&mut cwd, "new", 0, 0),
        Err(FATError::PermissionDenied(name)) if name == "new"
    ));
    assert!(matches!(vol.create_dir(&mut cwd, "new"), Err(FATError::PermissionDenied(_))));
    assert!(matches!(vol.remove(&mut cwd, &kept), Err(FATError::PermissionDenied(_))));
    assert!(matches!(
        vol.write_new_file(&mut cwd, "new", &b"data"[..]),
        Err(FATError::PermissionDenied(_))
    ));
    assert!(matches!(vol.repair(), Err(FATError::PermissionDenied(_))));
    assert!(vol.check().unwrap().is_empty());
}
