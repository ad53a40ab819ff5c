//! Loads the real, platform-native Oodle shared library and exposes it as a
//! `uepak::Oodle` capability.
//!
//! Unlike the Windows-PE-relocation loader some forks carry to run the
//! Windows DLL unmodified on Linux, this crate resolves the actual
//! platform-native binary (`liboo2corelinux64.so.9` on Linux,
//! `oo2core_9_win64.dll` on Windows) via `libloading` and calls into it
//! directly, mirroring the plain `ctypes.CDLL`-per-platform approach the
//! reference Python implementation uses.

use std::ffi::c_void;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use sha2::{Digest, Sha256};

use uepak::{Error, Oodle, Result};

const OODLE_VERSION: &str = "2.9.10";
const OODLE_BASE_URL: &str =
    "https://github.com/WorkingRobot/OodleUE/raw/refs/heads/main/Engine/Source/Programs/Shared/EpicGames.Oodle/Sdk";

struct Platform {
    path: &'static str,
    file_name: &'static str,
    sha256: &'static str,
}

#[cfg(target_os = "windows")]
const PLATFORM: Platform = Platform {
    path: "win/redist",
    file_name: "oo2core_9_win64.dll",
    sha256: "6f5d41a7892ea6b2db420f2458dad2f84a63901c9a93ce9497337b16c195f457",
};

#[cfg(not(target_os = "windows"))]
const PLATFORM: Platform = Platform {
    path: "linux/lib",
    file_name: "liboo2corelinux64.so.9",
    sha256: "ed7e98f70be1254a80644efd3ae442ff61f854a2fe9debb0b978b95289884e9c",
};

fn oodle_url() -> String {
    format!(
        "{OODLE_BASE_URL}/{OODLE_VERSION}/{}/{}",
        PLATFORM.path, PLATFORM.file_name
    )
}

type FnCompress = unsafe extern "C" fn(
    compressor: i32,
    raw_buf: *const u8,
    raw_len: usize,
    comp_buf: *mut u8,
    level: i32,
    options: *const c_void,
    dictionary_base: *const c_void,
    lrm: *const c_void,
    scratch_mem: *mut c_void,
    scratch_size: usize,
) -> i64;

type FnDecompress = unsafe extern "C" fn(
    comp_buf: *const u8,
    comp_buf_size: usize,
    raw_buf: *mut u8,
    raw_len: usize,
    fuzz_safe: u32,
    check_crc: u32,
    verbosity: u32,
    dec_buf_base: u64,
    dec_buf_size: usize,
    fp_callback: u64,
    callback_user_data: u64,
    decoder_memory: *mut u8,
    decoder_memory_size: usize,
    thread_phase: u32,
) -> i64;

type FnGetCompressedBufferSizeNeeded = unsafe extern "C" fn(compressor: i32, raw_len: usize) -> usize;
type FnSetPrintf = unsafe extern "C" fn(*const c_void);

/// A loaded Oodle native library, cached process-wide after first use.
pub struct NativeOodle {
    // Held only to keep the mapped library alive; the function pointers
    // above were copied out of it and remain valid as long as this lives.
    _library: libloading::Library,
    compress: FnCompress,
    decompress: FnDecompress,
    buffer_size_needed: FnGetCompressedBufferSizeNeeded,
}

impl NativeOodle {
    /// Loads (or returns the cached) Oodle library for this process.
    pub fn load() -> Result<Arc<NativeOodle>> {
        static INSTANCE: OnceLock<std::result::Result<Arc<NativeOodle>, String>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| Self::load_uncached().map(Arc::new).map_err(|e| e.to_string()))
            .clone()
            .map_err(Error::Oodle)
    }

    fn load_uncached() -> Result<NativeOodle> {
        let path = fetch_library()?;
        log::debug!("loading oodle library from {}", path.display());

        let library = unsafe { libloading::Library::new(&path) }
            .map_err(|e| Error::Oodle(format!("failed to load {}: {e}", path.display())))?;

        let compress = *unsafe { library.get::<FnCompress>(b"OodleLZ_Compress\0") }
            .map_err(|e| Error::Oodle(format!("missing OodleLZ_Compress: {e}")))?;
        let decompress = *unsafe { library.get::<FnDecompress>(b"OodleLZ_Decompress\0") }
            .map_err(|e| Error::Oodle(format!("missing OodleLZ_Decompress: {e}")))?;
        let buffer_size_needed = *unsafe {
            library.get::<FnGetCompressedBufferSizeNeeded>(
                b"OodleLZ_GetCompressedBufferSizeNeeded\0",
            )
        }
        .map_err(|e| Error::Oodle(format!("missing OodleLZ_GetCompressedBufferSizeNeeded: {e}")))?;

        if let Ok(set_printf) =
            unsafe { library.get::<FnSetPrintf>(b"OodleCore_Plugins_SetPrintf\0") }
        {
            unsafe { set_printf(std::ptr::null()) };
        }

        Ok(NativeOodle {
            _library: library,
            compress,
            decompress,
            buffer_size_needed,
        })
    }
}

impl Oodle for NativeOodle {
    fn decompress(&self, input: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; expected_size];
        let written = unsafe {
            (self.decompress)(
                input.as_ptr(),
                input.len(),
                out.as_mut_ptr(),
                out.len(),
                1,
                1,
                0,
                0,
                0,
                0,
                0,
                std::ptr::null_mut(),
                0,
                3,
            )
        };
        if written <= 0 {
            return Err(Error::Oodle("OodleLZ_Decompress failed".to_string()));
        }
        out.truncate(written as usize);
        Ok(out)
    }

    fn compress(&self, input: &[u8], compressor_id: i32, level: i32) -> Result<Vec<u8>> {
        let bound = unsafe { (self.buffer_size_needed)(compressor_id, input.len()) };
        let mut out = vec![0u8; bound];
        let written = unsafe {
            (self.compress)(
                compressor_id,
                input.as_ptr(),
                input.len(),
                out.as_mut_ptr(),
                level,
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null_mut(),
                0,
            )
        };
        if written < 0 {
            return Err(Error::Oodle("OodleLZ_Compress failed".to_string()));
        }
        out.truncate(written as usize);
        Ok(out)
    }
}

fn fetch_library() -> Result<PathBuf> {
    let path = std::env::current_exe()?.with_file_name(PLATFORM.file_name);

    if path.exists() {
        verify_hash(&path)?;
    } else {
        download(&path)?;
    }

    Ok(path)
}

fn download(path: &Path) -> Result<()> {
    log::info!("downloading {} from {}", PLATFORM.file_name, oodle_url());
    let mut data = Vec::new();
    ureq::get(&oodle_url())
        .call()
        .map_err(|e| Error::Oodle(format!("fetching {}: {e}", PLATFORM.file_name)))?
        .into_reader()
        .read_to_end(&mut data)?;

    let digest = hex::encode(Sha256::digest(&data));
    if digest != PLATFORM.sha256 {
        return Err(Error::Oodle(format!(
            "downloaded {} hash mismatch: expected {}, got {digest}",
            PLATFORM.file_name, PLATFORM.sha256
        )));
    }

    std::fs::write(path, data)?;
    Ok(())
}

fn verify_hash(path: &Path) -> Result<()> {
    let data = std::fs::read(path)?;
    let digest = hex::encode(Sha256::digest(&data));
    if digest != PLATFORM.sha256 {
        return Err(Error::Oodle(format!(
            "{} hash mismatch: expected {}, got {digest}",
            PLATFORM.file_name, PLATFORM.sha256
        )));
    }
    Ok(())
}
