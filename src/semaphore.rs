// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named inter-process counting semaphore.
// POSIX: sem_open() named semaphore.
// Windows: CreateSemaphoreW() kernel object.
//
// Used internally by IpcCondition's Windows emulation (semaphore + mutex +
// shared counter), and exposed publicly for callers that need a raw
// named semaphore.

use std::io;

#[cfg(unix)]
mod imp {
    use super::*;
    use std::ffi::CString;

    pub struct PlatformSemaphore {
        sem: *mut libc::sem_t,
        name: CString,
    }

    unsafe impl Send for PlatformSemaphore {}
    unsafe impl Sync for PlatformSemaphore {}

    impl PlatformSemaphore {
        pub fn open(name: &str, initial_count: u32) -> io::Result<Self> {
            let shm_name = crate::shm_name::make_shm_name(name);
            let cname = CString::new(shm_name).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            })?;
            let sem = unsafe {
                libc::sem_open(
                    cname.as_ptr(),
                    libc::O_CREAT,
                    0o666,
                    initial_count as libc::c_uint,
                )
            };
            if sem == libc::SEM_FAILED {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { sem, name: cname })
        }

        pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
            match timeout_ms {
                None => {
                    let ret = unsafe { libc::sem_wait(self.sem) };
                    if ret != 0 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(true)
                }
                Some(ms) => {
                    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
                    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
                    ts.tv_sec += (ms / 1000) as libc::time_t;
                    ts.tv_nsec += ((ms % 1000) * 1_000_000) as i64;
                    if ts.tv_nsec >= 1_000_000_000 {
                        ts.tv_sec += 1;
                        ts.tv_nsec -= 1_000_000_000;
                    }
                    let ret = unsafe { libc::sem_timedwait(self.sem, &ts) };
                    if ret == 0 {
                        return Ok(true);
                    }
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::TimedOut
                        || err.raw_os_error() == Some(libc::ETIMEDOUT)
                    {
                        return Ok(false);
                    }
                    Err(err)
                }
            }
        }

        pub fn post(&self, count: u32) -> io::Result<()> {
            for _ in 0..count {
                if unsafe { libc::sem_post(self.sem) } != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        }

        pub fn clear_storage(name: &str) {
            let shm_name = crate::shm_name::make_shm_name(name);
            if let Ok(cname) = CString::new(shm_name) {
                unsafe {
                    libc::sem_unlink(cname.as_ptr());
                }
            }
        }
    }

    impl Drop for PlatformSemaphore {
        fn drop(&mut self) {
            unsafe {
                libc::sem_close(self.sem);
            }
            let _ = &self.name;
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use std::ptr;

    pub struct PlatformSemaphore {
        handle: windows_sys::Win32::Foundation::HANDLE,
    }

    unsafe impl Send for PlatformSemaphore {}
    unsafe impl Sync for PlatformSemaphore {}

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    impl PlatformSemaphore {
        pub fn open(name: &str, initial_count: u32) -> io::Result<Self> {
            use windows_sys::Win32::System::Threading::CreateSemaphoreW;

            let wide_name = to_wide(name);
            let handle = unsafe {
                CreateSemaphoreW(
                    ptr::null(),
                    initial_count as i32,
                    i32::MAX,
                    wide_name.as_ptr(),
                )
            };
            if handle == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { handle })
        }

        pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
            use windows_sys::Win32::Foundation::*;
            use windows_sys::Win32::System::Threading::{WaitForSingleObject, INFINITE};

            let ms = timeout_ms.map(|v| v as u32).unwrap_or(INFINITE);
            let ret = unsafe { WaitForSingleObject(self.handle, ms) };
            match ret {
                WAIT_OBJECT_0 => Ok(true),
                WAIT_TIMEOUT => Ok(false),
                _ => Err(io::Error::last_os_error()),
            }
        }

        pub fn post(&self, count: u32) -> io::Result<()> {
            use windows_sys::Win32::System::Threading::ReleaseSemaphore;

            if unsafe { ReleaseSemaphore(self.handle, count as i32, ptr::null_mut()) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn clear_storage(_name: &str) {
            // No-op on Windows — kernel objects are reclaimed when unreferenced.
        }
    }

    impl Drop for PlatformSemaphore {
        fn drop(&mut self) {
            use windows_sys::Win32::Foundation::CloseHandle;
            if self.handle != 0 {
                unsafe { CloseHandle(self.handle) };
            }
        }
    }
}

/// A named, inter-process counting semaphore.
pub struct IpcSemaphore {
    inner: imp::PlatformSemaphore,
}

impl IpcSemaphore {
    /// Open (or create) a named semaphore with the given initial count.
    pub fn open(name: &str, initial_count: u32) -> io::Result<Self> {
        Ok(Self {
            inner: imp::PlatformSemaphore::open(name, initial_count)?,
        })
    }

    /// Wait (decrement), blocking up to `timeout_ms` milliseconds. `None` blocks
    /// indefinitely. Returns `Ok(false)` on timeout, not an error.
    pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        self.inner.wait(timeout_ms)
    }

    /// Post (increment) by `count`.
    pub fn post(&self, count: u32) -> io::Result<()> {
        self.inner.post(count)
    }

    /// Remove the backing storage for a named semaphore (static helper).
    pub fn clear_storage(name: &str) {
        imp::PlatformSemaphore::clear_storage(name);
    }
}
