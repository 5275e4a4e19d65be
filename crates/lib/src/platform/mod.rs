pub mod paths;

/// Returns true if the process runs with administrative privileges.
#[cfg(unix)]
pub fn is_elevated() -> bool {
  rustix::process::geteuid().is_root()
}

/// Returns true if the process runs with administrative privileges.
#[cfg(windows)]
pub fn is_elevated() -> bool {
  use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
  use windows_sys::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
  use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

  // SAFETY: the token handle is only used while open and closed before
  // returning; TOKEN_ELEVATION is plain data.
  unsafe {
    let mut token: HANDLE = std::ptr::null_mut();
    if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
      return false;
    }
    let mut elevation: TOKEN_ELEVATION = std::mem::zeroed();
    let mut size = 0u32;
    let ok = GetTokenInformation(
      token,
      TokenElevation,
      &mut elevation as *mut _ as *mut _,
      std::mem::size_of::<TOKEN_ELEVATION>() as u32,
      &mut size,
    );
    CloseHandle(token);
    ok != 0 && elevation.TokenIsElevated != 0
  }
}
