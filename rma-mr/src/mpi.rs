//! MPI-based implementation of OneSided.
use crate::{BenchError, OneSided, Result, ThreadLevel};
use lazy_static::lazy_static;
use mpi_sys::{
    MPI_Abort, MPI_Aint, MPI_Barrier, MPI_Comm, MPI_Comm_rank, MPI_Comm_size, MPI_Finalize,
    MPI_Init_thread, MPI_Put, MPI_Win, MPI_Win_create, MPI_Win_flush, MPI_Win_free,
    MPI_Win_lock_all, MPI_Win_unlock_all, RSMPI_COMM_WORLD, RSMPI_INFO_NULL,
    RSMPI_THREAD_FUNNELED, RSMPI_THREAD_MULTIPLE, RSMPI_THREAD_SERIALIZED, RSMPI_UINT8_T,
};
use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::os::raw::c_int;
use std::sync::Mutex;
use tracing::{debug, error};

const MPI_SUCCESS: c_int = 0;

lazy_static! {
    static ref MPI_INIT_LOCK: Mutex<i32> = Mutex::new(0);
}

/// Map an MPI return code to a result.
///
/// Nothing here installs an error handler, so under the default
/// `MPI_ERRORS_ARE_FATAL` a failing call aborts the job inside MPI and never
/// returns. A non-success code only reaches this point when the
/// implementation or a user-installed handler returns errors instead.
fn check(op: &'static str, code: c_int) -> Result<()> {
    if code == MPI_SUCCESS {
        Ok(())
    } else {
        Err(BenchError::Substrate { op, code })
    }
}

fn to_c_int(value: usize, what: &str) -> Result<c_int> {
    value
        .try_into()
        .map_err(|_| BenchError::InvalidParams(format!("{what} {value} does not fit an MPI count")))
}

/// Initialize MPI requesting full multithreading support.
///
/// The level actually provided is recorded rather than asserted, so the
/// benchmark can refuse to run with a configuration error.
pub fn init_standard_mpi() -> Result<MPIWorld> {
    let mut init_lock = MPI_INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if *init_lock != 0 {
        return Err(BenchError::AlreadyInitialized);
    }
    unsafe {
        let mut provided: c_int = 0;
        check(
            "init",
            MPI_Init_thread(
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                RSMPI_THREAD_MULTIPLE,
                &mut provided,
            ),
        )?;
        *init_lock = 1;
        let level = if provided == RSMPI_THREAD_MULTIPLE {
            ThreadLevel::Multiple
        } else if provided == RSMPI_THREAD_SERIALIZED {
            ThreadLevel::Serialized
        } else if provided == RSMPI_THREAD_FUNNELED {
            ThreadLevel::Funneled
        } else {
            ThreadLevel::Single
        };
        debug!(?level, "MPI initialized");
        Ok(MPIWorld {
            comm: RSMPI_COMM_WORLD,
            level,
        })
    }
}

impl Drop for MPIWorld {
    fn drop(&mut self) {
        unsafe {
            MPI_Finalize();
            let mut init_lock = MPI_INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            *init_lock = 0;
        }
    }
}

pub struct MPIWorld {
    comm: MPI_Comm,
    level: ThreadLevel,
}

// The benchmark only runs once MPI reports MPI_THREAD_MULTIPLE, which makes
// concurrent calls on the communicator and its windows legal.
unsafe impl Send for MPIWorld {}
unsafe impl Sync for MPIWorld {}

pub struct MPIWindow(MPI_Win);

unsafe impl Send for MPIWindow {}
unsafe impl Sync for MPIWindow {}

impl OneSided for MPIWorld {
    type Window = MPIWindow;

    fn rank(&self) -> u32 {
        let mut value = 0;
        unsafe {
            MPI_Comm_rank(self.comm, &mut value);
        }
        value.try_into().unwrap_or(0)
    }

    fn size(&self) -> u32 {
        let mut value = 0;
        unsafe {
            MPI_Comm_size(self.comm, &mut value);
        }
        value.try_into().unwrap_or(0)
    }

    fn thread_level(&self) -> ThreadLevel {
        self.level
    }

    fn barrier(&self) -> Result<()> {
        unsafe { check("barrier", MPI_Barrier(self.comm)) }
    }

    unsafe fn win_create(&self, base: *mut u8, len: usize) -> Result<MPIWindow> {
        let size: MPI_Aint = len
            .try_into()
            .map_err(|_| BenchError::InvalidParams(format!("window of {len} bytes")))?;
        let mut win = MaybeUninit::uninit();
        check(
            "win_create",
            MPI_Win_create(
                base as *mut c_void,
                size,
                1,
                RSMPI_INFO_NULL,
                self.comm,
                win.as_mut_ptr(),
            ),
        )?;
        Ok(MPIWindow(win.assume_init()))
    }

    fn win_free(&self, win: MPIWindow) -> Result<()> {
        let mut raw = win.0;
        unsafe { check("win_free", MPI_Win_free(&mut raw)) }
    }

    fn lock_all(&self, win: &MPIWindow) -> Result<()> {
        // Assert 0 rather than MPI_MODE_NOCHECK, whose value differs between
        // MPI implementations.
        unsafe { check("lock_all", MPI_Win_lock_all(0, win.0)) }
    }

    fn unlock_all(&self, win: &MPIWindow) -> Result<()> {
        unsafe { check("unlock_all", MPI_Win_unlock_all(win.0)) }
    }

    fn put(&self, win: &MPIWindow, src: &[u8], target: u32, disp: usize) -> Result<()> {
        let count = to_c_int(src.len(), "message size")?;
        let target = to_c_int(target as usize, "rank")?;
        let disp: MPI_Aint = disp
            .try_into()
            .map_err(|_| BenchError::InvalidParams(format!("displacement {disp}")))?;
        unsafe {
            check(
                "put",
                MPI_Put(
                    src.as_ptr() as *const c_void,
                    count,
                    RSMPI_UINT8_T,
                    target,
                    disp,
                    count,
                    RSMPI_UINT8_T,
                    win.0,
                ),
            )
        }
    }

    fn flush(&self, win: &MPIWindow, target: u32) -> Result<()> {
        let target = to_c_int(target as usize, "rank")?;
        unsafe { check("flush", MPI_Win_flush(target, win.0)) }
    }

    fn abort(&self, code: i32) {
        error!(code, "calling MPI_Abort");
        unsafe {
            MPI_Abort(self.comm, code);
        }
    }
}
