use pagevault::{
    common::{PagePos, Result, VaultError},
    storage::{File, FileMode, MemoryFile, PosixFile, StorageManager},
};

const PAGE_SIZE: usize = 64;

fn memory_storage() -> StorageManager {
    StorageManager::new(Box::new(MemoryFile::new(FileMode::WRITE)), PAGE_SIZE)
}

#[test]
fn test_posix_file_basic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blocks.dat");

    let mut file = PosixFile::new(&path, FileMode::WRITE)?;
    assert_eq!(file.size()?, 0);

    file.write_block(b"hello", 10)?;
    assert_eq!(file.size()?, 15);

    let mut buf = [0u8; 5];
    file.read_block(10, &mut buf)?;
    assert_eq!(&buf, b"hello");
    file.sync()?;

    // The gap before the first write reads back as zeros
    let mut gap = [0xFFu8; 10];
    file.read_block(0, &mut gap)?;
    assert_eq!(gap, [0u8; 10]);

    Ok(())
}

#[test]
fn test_read_only_file_rejects_writes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ro.dat");
    PosixFile::new(&path, FileMode::WRITE)?.write_block(&[1, 2, 3], 0)?;

    let mut file = PosixFile::new(&path, FileMode::READ)?;
    assert_eq!(file.get_mode(), FileMode::READ);
    assert!(file.write_block(&[4], 0).is_err());
    assert!(file.resize(0).is_err());

    let mut buf = [0u8; 3];
    file.read_block(0, &mut buf)?;
    assert_eq!(buf, [1, 2, 3]);
    Ok(())
}

#[test]
fn test_file_rejects_read_past_end() -> Result<()> {
    let mut file = MemoryFile::with_data(vec![7; 8], FileMode::WRITE);
    let mut buf = [0u8; 4];
    assert!(file.read_block(6, &mut buf).is_err());

    file.resize(2)?;
    assert_eq!(file.get_data(), &[7, 7]);
    Ok(())
}

#[test]
fn test_temporary_file_is_usable() -> Result<()> {
    let mut file = PosixFile::make_temporary()?;
    file.write_block(&[9; 16], 0)?;
    assert_eq!(file.size()?, 16);
    Ok(())
}

#[test]
fn test_storage_reads_beyond_eof_as_zeros() -> Result<()> {
    let storage = memory_storage();
    assert!(storage.empty()?);

    let mut buf = vec![0xAB; PAGE_SIZE];
    storage.read_block(PagePos(3 * PAGE_SIZE as u64), &mut buf)?;
    assert!(buf.iter().all(|&b| b == 0));

    // Reading does not grow the file
    assert!(storage.empty()?);
    Ok(())
}

#[test]
fn test_storage_write_then_read() -> Result<()> {
    let storage = memory_storage();
    let pos = PagePos(PAGE_SIZE as u64);

    storage.write_block(pos, &[0x5A; PAGE_SIZE])?;
    storage.flush()?;
    assert_eq!(storage.size()?, 2 * PAGE_SIZE);

    let mut buf = vec![0; PAGE_SIZE];
    storage.read_block(pos, &mut buf)?;
    assert_eq!(buf, vec![0x5A; PAGE_SIZE]);

    storage.read_block(PagePos(0), &mut buf)?;
    assert_eq!(buf, vec![0; PAGE_SIZE]);
    Ok(())
}

#[test]
fn test_storage_extend_appends_aligned_pages() -> Result<()> {
    let storage = memory_storage();
    assert_eq!(storage.extend()?, PagePos(0));
    assert_eq!(storage.extend()?, PagePos(PAGE_SIZE as u64));
    assert_eq!(storage.size()?, 2 * PAGE_SIZE);
    assert!(!storage.empty()?);
    Ok(())
}

#[test]
fn test_storage_rejects_bad_blocks() {
    let storage = memory_storage();
    let mut buf = vec![0; PAGE_SIZE];

    assert!(matches!(
        storage.read_block(PagePos(10), &mut buf),
        Err(VaultError::MisalignedPosition(PagePos(10), PAGE_SIZE))
    ));
    assert!(matches!(
        storage.write_block(PagePos(0), &[0; 10]),
        Err(VaultError::PageSizeExceeded(10, PAGE_SIZE))
    ));
}

#[test]
fn test_storage_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pages.db");

    {
        let storage = StorageManager::open(&path, PAGE_SIZE)?;
        storage.write_block(PagePos(0), &[1; PAGE_SIZE])?;
        storage.flush()?;
    }

    let storage = StorageManager::open(&path, PAGE_SIZE)?;
    let mut buf = vec![0; PAGE_SIZE];
    storage.read_block(PagePos(0), &mut buf)?;
    assert_eq!(buf, vec![1; PAGE_SIZE]);
    Ok(())
}
