//! Minimal FFI surface over the HailoRT C library.
//!
//! The library is opened with `libloading` at daemon startup instead of being
//! linked at build time, so the workspace builds on hosts without the Hailo
//! SDK (CI, cross-compilation). Missing library or symbols surface as device
//! open errors and the daemon exits non-zero.
//!
//! Only the pieces of the 4.x C API the daemon needs are bound: vdevice
//! lifecycle, HEF open, network-group configuration, and blocking raw-buffer
//! vstream inference. Raw handles are confined to the executor thread.

use std::{
    ffi::{c_char, c_void, CString},
    path::Path,
    sync::Arc,
};

use libloading::Library;

use crate::device::DeviceError;

/// Candidate library names, most specific first.
const LIBRARY_NAMES: &[&str] = &["libhailort.so.4", "libhailort.so"];

pub type HailoStatus = i32;
pub const HAILO_SUCCESS: HailoStatus = 0;

pub const HAILO_MAX_STREAM_NAME_SIZE: usize = 96;
pub const HAILO_FORMAT_TYPE_AUTO: u32 = 0;
/// Upper bound on network groups per HEF; the daemon uses the first.
const MAX_NETWORK_GROUPS: usize = 8;

type HailoVDevice = *mut c_void;
type HailoHef = *mut c_void;
type HailoConfiguredNetworkGroup = *mut c_void;
type HailoActivatedNetworkGroup = *mut c_void;
type HailoInputVStream = *mut c_void;
type HailoOutputVStream = *mut c_void;

#[repr(C)]
#[derive(Clone, Copy)]
struct HailoFormat {
    format_type: u32,
    order: u32,
    flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct HailoVStreamParams {
    user_buffer_format: HailoFormat,
    timeout_ms: u32,
    queue_size: u32,
    vstream_stats_flags: u32,
    pipeline_elements_stats_flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct HailoInputVStreamParamsByName {
    name: [c_char; HAILO_MAX_STREAM_NAME_SIZE],
    params: HailoVStreamParams,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct HailoOutputVStreamParamsByName {
    name: [c_char; HAILO_MAX_STREAM_NAME_SIZE],
    params: HailoVStreamParams,
}

type CreateVDeviceFn = unsafe extern "C" fn(*mut c_void, *mut HailoVDevice) -> HailoStatus;
type ReleaseVDeviceFn = unsafe extern "C" fn(HailoVDevice) -> HailoStatus;
type CreateHefFileFn = unsafe extern "C" fn(*mut HailoHef, *const c_char) -> HailoStatus;
type ReleaseHefFn = unsafe extern "C" fn(HailoHef) -> HailoStatus;
type ConfigureVDeviceFn = unsafe extern "C" fn(
    HailoVDevice,
    HailoHef,
    *mut c_void,
    *mut HailoConfiguredNetworkGroup,
    *mut usize,
) -> HailoStatus;
type MakeInputParamsFn = unsafe extern "C" fn(
    HailoConfiguredNetworkGroup,
    bool,
    u32,
    *mut HailoInputVStreamParamsByName,
    *mut usize,
) -> HailoStatus;
type MakeOutputParamsFn = unsafe extern "C" fn(
    HailoConfiguredNetworkGroup,
    bool,
    u32,
    *mut HailoOutputVStreamParamsByName,
    *mut usize,
) -> HailoStatus;
type CreateInputVStreamsFn = unsafe extern "C" fn(
    HailoConfiguredNetworkGroup,
    *const HailoInputVStreamParamsByName,
    usize,
    *mut HailoInputVStream,
) -> HailoStatus;
type CreateOutputVStreamsFn = unsafe extern "C" fn(
    HailoConfiguredNetworkGroup,
    *const HailoOutputVStreamParamsByName,
    usize,
    *mut HailoOutputVStream,
) -> HailoStatus;
type ReleaseInputVStreamsFn = unsafe extern "C" fn(*mut HailoInputVStream, usize) -> HailoStatus;
type ReleaseOutputVStreamsFn = unsafe extern "C" fn(*mut HailoOutputVStream, usize) -> HailoStatus;
type InputFrameSizeFn = unsafe extern "C" fn(HailoInputVStream, *mut usize) -> HailoStatus;
type OutputFrameSizeFn = unsafe extern "C" fn(HailoOutputVStream, *mut usize) -> HailoStatus;
type ActivateFn = unsafe extern "C" fn(
    HailoConfiguredNetworkGroup,
    *mut c_void,
    *mut HailoActivatedNetworkGroup,
) -> HailoStatus;
type DeactivateFn = unsafe extern "C" fn(HailoActivatedNetworkGroup) -> HailoStatus;
type WriteRawFn = unsafe extern "C" fn(HailoInputVStream, *const c_void, usize) -> HailoStatus;
type FlushInputFn = unsafe extern "C" fn(HailoInputVStream) -> HailoStatus;
type ReadRawFn = unsafe extern "C" fn(HailoOutputVStream, *mut c_void, usize) -> HailoStatus;

/// Handle to the dynamically loaded HailoRT library.
pub struct HailoApi {
    lib: Library,
}

impl HailoApi {
    /// Open `libhailort` from the system loader path.
    pub fn load() -> Result<Arc<Self>, DeviceError> {
        for name in LIBRARY_NAMES {
            match unsafe { Library::new(name) } {
                Ok(lib) => {
                    tracing::info!(event = "hailort_loaded", library = name, "HailoRT loaded");
                    return Ok(Arc::new(Self { lib }));
                }
                Err(err) => {
                    tracing::debug!(event = "hailort_probe", library = name, error = %err, "Library candidate unavailable");
                }
            }
        }
        Err(DeviceError::DeviceLost(
            "HailoRT library not found (tried libhailort.so.4, libhailort.so)".into(),
        ))
    }

    fn sym<T>(&self, name: &'static [u8]) -> Result<libloading::Symbol<'_, T>, DeviceError> {
        unsafe { self.lib.get(name) }.map_err(|err| {
            DeviceError::DeviceLost(format!(
                "missing HailoRT symbol {}: {err}",
                String::from_utf8_lossy(&name[..name.len() - 1])
            ))
        })
    }

    fn check(&self, call: &'static str, status: HailoStatus) -> Result<(), DeviceError> {
        if status == HAILO_SUCCESS {
            Ok(())
        } else {
            Err(DeviceError::Backend(format!(
                "{call} failed with status {status}"
            )))
        }
    }
}

/// The exclusive virtual-device handle.
pub struct VDevice {
    api: Arc<HailoApi>,
    raw: HailoVDevice,
}

// Raw handles never leave the executor thread; Send is required only to move
// the adapter onto that thread at startup.
unsafe impl Send for VDevice {}

impl VDevice {
    pub fn create(api: Arc<HailoApi>) -> Result<Self, DeviceError> {
        let create: libloading::Symbol<CreateVDeviceFn> = api.sym(b"hailo_create_vdevice\0")?;
        let mut raw: HailoVDevice = std::ptr::null_mut();
        let status = unsafe { create(std::ptr::null_mut(), &mut raw) };
        if status != HAILO_SUCCESS {
            return Err(DeviceError::DeviceLost(format!(
                "hailo_create_vdevice failed with status {status}"
            )));
        }
        Ok(Self { api, raw })
    }
}

impl Drop for VDevice {
    fn drop(&mut self) {
        if self.raw.is_null() {
            return;
        }
        match self.api.sym::<ReleaseVDeviceFn>(b"hailo_release_vdevice\0") {
            Ok(release) => {
                let status = unsafe { release(self.raw) };
                if status != HAILO_SUCCESS {
                    tracing::warn!(
                        event = "vdevice_release_failed",
                        status,
                        "Releasing the vdevice failed"
                    );
                }
            }
            Err(err) => tracing::warn!(
                event = "vdevice_release_failed",
                error = %err,
                "Releasing the vdevice failed"
            ),
        }
    }
}

/// One configured model on the device: HEF, network group, and vstreams,
/// ready for blocking raw-buffer inference.
pub struct RawSession {
    api: Arc<HailoApi>,
    hef: HailoHef,
    group: HailoConfiguredNetworkGroup,
    inputs: Vec<HailoInputVStream>,
    input_frame_sizes: Vec<usize>,
    outputs: Vec<HailoOutputVStream>,
    output_frame_sizes: Vec<usize>,
}

unsafe impl Send for RawSession {}

impl RawSession {
    /// Configure `model_path` onto the vdevice and build its vstreams.
    pub fn open(api: Arc<HailoApi>, vdevice: &VDevice, model_path: &Path) -> Result<Self, DeviceError> {
        let c_path = CString::new(model_path.display().to_string())
            .map_err(|_| DeviceError::InvalidInput("model_path contains a NUL byte".into()))?;

        let create_hef: libloading::Symbol<CreateHefFileFn> = api.sym(b"hailo_create_hef_file\0")?;
        let mut hef: HailoHef = std::ptr::null_mut();
        let status = unsafe { create_hef(&mut hef, c_path.as_ptr()) };
        api.check("hailo_create_hef_file", status)?;

        let result = Self::configure(&api, vdevice, hef);
        if result.is_err() {
            release_hef(&api, hef);
        }
        result
    }

    fn configure(
        api: &Arc<HailoApi>,
        vdevice: &VDevice,
        hef: HailoHef,
    ) -> Result<Self, DeviceError> {
        let configure: libloading::Symbol<ConfigureVDeviceFn> =
            api.sym(b"hailo_configure_vdevice\0")?;
        let mut groups = [std::ptr::null_mut(); MAX_NETWORK_GROUPS];
        let mut group_count = MAX_NETWORK_GROUPS;
        let status = unsafe {
            configure(
                vdevice.raw,
                hef,
                std::ptr::null_mut(),
                groups.as_mut_ptr(),
                &mut group_count,
            )
        };
        api.check("hailo_configure_vdevice", status)?;
        if group_count == 0 {
            return Err(DeviceError::Backend(
                "HEF contains no network groups".into(),
            ));
        }
        let group = groups[0];

        let zeroed_params = HailoVStreamParams {
            user_buffer_format: HailoFormat {
                format_type: HAILO_FORMAT_TYPE_AUTO,
                order: 0,
                flags: 0,
            },
            timeout_ms: 0,
            queue_size: 0,
            vstream_stats_flags: 0,
            pipeline_elements_stats_flags: 0,
        };

        let make_inputs: libloading::Symbol<MakeInputParamsFn> =
            api.sym(b"hailo_make_input_vstream_params\0")?;
        let mut input_params = [HailoInputVStreamParamsByName {
            name: [0; HAILO_MAX_STREAM_NAME_SIZE],
            params: zeroed_params,
        }; MAX_NETWORK_GROUPS * 2];
        let mut input_count = input_params.len();
        let status = unsafe {
            make_inputs(
                group,
                false,
                HAILO_FORMAT_TYPE_AUTO,
                input_params.as_mut_ptr(),
                &mut input_count,
            )
        };
        api.check("hailo_make_input_vstream_params", status)?;

        let make_outputs: libloading::Symbol<MakeOutputParamsFn> =
            api.sym(b"hailo_make_output_vstream_params\0")?;
        let mut output_params = [HailoOutputVStreamParamsByName {
            name: [0; HAILO_MAX_STREAM_NAME_SIZE],
            params: zeroed_params,
        }; MAX_NETWORK_GROUPS * 2];
        let mut output_count = output_params.len();
        let status = unsafe {
            make_outputs(
                group,
                false,
                HAILO_FORMAT_TYPE_AUTO,
                output_params.as_mut_ptr(),
                &mut output_count,
            )
        };
        api.check("hailo_make_output_vstream_params", status)?;

        let create_in: libloading::Symbol<CreateInputVStreamsFn> =
            api.sym(b"hailo_create_input_vstreams\0")?;
        let mut inputs = vec![std::ptr::null_mut(); input_count];
        let status =
            unsafe { create_in(group, input_params.as_ptr(), input_count, inputs.as_mut_ptr()) };
        api.check("hailo_create_input_vstreams", status)?;

        let create_out: libloading::Symbol<CreateOutputVStreamsFn> =
            api.sym(b"hailo_create_output_vstreams\0")?;
        let mut outputs = vec![std::ptr::null_mut(); output_count];
        let status = unsafe {
            create_out(
                group,
                output_params.as_ptr(),
                output_count,
                outputs.as_mut_ptr(),
            )
        };
        if status != HAILO_SUCCESS {
            release_input_vstreams(api, &mut inputs);
            return Err(DeviceError::Backend(format!(
                "hailo_create_output_vstreams failed with status {status}"
            )));
        }

        let in_size: libloading::Symbol<InputFrameSizeFn> =
            api.sym(b"hailo_get_input_vstream_frame_size\0")?;
        let mut input_frame_sizes = Vec::with_capacity(inputs.len());
        for &stream in &inputs {
            let mut size = 0usize;
            let status = unsafe { in_size(stream, &mut size) };
            api.check("hailo_get_input_vstream_frame_size", status)?;
            input_frame_sizes.push(size);
        }

        let out_size: libloading::Symbol<OutputFrameSizeFn> =
            api.sym(b"hailo_get_output_vstream_frame_size\0")?;
        let mut output_frame_sizes = Vec::with_capacity(outputs.len());
        for &stream in &outputs {
            let mut size = 0usize;
            let status = unsafe { out_size(stream, &mut size) };
            api.check("hailo_get_output_vstream_frame_size", status)?;
            output_frame_sizes.push(size);
        }

        Ok(Self {
            api: api.clone(),
            hef,
            group,
            inputs,
            input_frame_sizes,
            outputs,
            output_frame_sizes,
        })
    }

    pub fn input_frame_sizes(&self) -> &[usize] {
        &self.input_frame_sizes
    }

    pub fn output_frame_sizes(&self) -> &[usize] {
        &self.output_frame_sizes
    }

    /// Run one blocking inference: write every input frame, flush, read every
    /// output frame.
    ///
    /// Write/read failures are classified as device loss; the device went
    /// away mid-call and the executor degrades it.
    pub fn infer(&mut self, input_frames: &[&[u8]]) -> Result<Vec<Vec<u8>>, DeviceError> {
        if input_frames.len() != self.inputs.len() {
            return Err(DeviceError::InvalidInput(format!(
                "model expects {} input tensors, got {}",
                self.inputs.len(),
                input_frames.len()
            )));
        }
        for (index, frame) in input_frames.iter().enumerate() {
            let expected = self.input_frame_sizes[index];
            if frame.len() != expected {
                return Err(DeviceError::InvalidInput(format!(
                    "input tensor {index} is {} bytes, model expects {expected}",
                    frame.len()
                )));
            }
        }

        let activate: libloading::Symbol<ActivateFn> =
            self.api.sym(b"hailo_activate_network_group\0")?;
        let mut activated: HailoActivatedNetworkGroup = std::ptr::null_mut();
        let status = unsafe { activate(self.group, std::ptr::null_mut(), &mut activated) };
        self.api.check("hailo_activate_network_group", status)?;

        let result = self.run_streams(input_frames);

        let deactivate: libloading::Symbol<DeactivateFn> =
            self.api.sym(b"hailo_deactivate_network_group\0")?;
        let status = unsafe { deactivate(activated) };
        if status != HAILO_SUCCESS {
            tracing::warn!(
                event = "network_group_deactivate_failed",
                status,
                "Deactivating the network group failed"
            );
        }

        result
    }

    fn run_streams(&mut self, input_frames: &[&[u8]]) -> Result<Vec<Vec<u8>>, DeviceError> {
        let write: libloading::Symbol<WriteRawFn> =
            self.api.sym(b"hailo_vstream_write_raw_buffer\0")?;
        let flush: libloading::Symbol<FlushInputFn> =
            self.api.sym(b"hailo_flush_input_vstream\0")?;
        let read: libloading::Symbol<ReadRawFn> =
            self.api.sym(b"hailo_vstream_read_raw_buffer\0")?;

        for (index, frame) in input_frames.iter().enumerate() {
            let stream = self.inputs[index];
            let status =
                unsafe { write(stream, frame.as_ptr() as *const c_void, frame.len()) };
            if status != HAILO_SUCCESS {
                return Err(DeviceError::DeviceLost(format!(
                    "vstream write failed with status {status}"
                )));
            }
            let status = unsafe { flush(stream) };
            if status != HAILO_SUCCESS {
                return Err(DeviceError::DeviceLost(format!(
                    "vstream flush failed with status {status}"
                )));
            }
        }

        let mut output_frames = Vec::with_capacity(self.outputs.len());
        for (index, &stream) in self.outputs.iter().enumerate() {
            let mut frame = vec![0u8; self.output_frame_sizes[index]];
            let status =
                unsafe { read(stream, frame.as_mut_ptr() as *mut c_void, frame.len()) };
            if status != HAILO_SUCCESS {
                return Err(DeviceError::DeviceLost(format!(
                    "vstream read failed with status {status}"
                )));
            }
            output_frames.push(frame);
        }
        Ok(output_frames)
    }
}

impl Drop for RawSession {
    fn drop(&mut self) {
        release_input_vstreams(&self.api, &mut self.inputs);
        if !self.outputs.is_empty() {
            match self
                .api
                .sym::<ReleaseOutputVStreamsFn>(b"hailo_release_output_vstreams\0")
            {
                Ok(release) => {
                    let status = unsafe { release(self.outputs.as_mut_ptr(), self.outputs.len()) };
                    if status != HAILO_SUCCESS {
                        tracing::warn!(
                            event = "vstream_release_failed",
                            status,
                            "Releasing output vstreams failed"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(event = "vstream_release_failed", error = %err, "Releasing output vstreams failed")
                }
            }
            self.outputs.clear();
        }
        release_hef(&self.api, self.hef);
        self.hef = std::ptr::null_mut();
    }
}

fn release_input_vstreams(api: &HailoApi, streams: &mut Vec<HailoInputVStream>) {
    if streams.is_empty() {
        return;
    }
    match api.sym::<ReleaseInputVStreamsFn>(b"hailo_release_input_vstreams\0") {
        Ok(release) => {
            let status = unsafe { release(streams.as_mut_ptr(), streams.len()) };
            if status != HAILO_SUCCESS {
                tracing::warn!(
                    event = "vstream_release_failed",
                    status,
                    "Releasing input vstreams failed"
                );
            }
        }
        Err(err) => {
            tracing::warn!(event = "vstream_release_failed", error = %err, "Releasing input vstreams failed")
        }
    }
    streams.clear();
}

fn release_hef(api: &HailoApi, hef: HailoHef) {
    if hef.is_null() {
        return;
    }
    match api.sym::<ReleaseHefFn>(b"hailo_release_hef\0") {
        Ok(release) => {
            let status = unsafe { release(hef) };
            if status != HAILO_SUCCESS {
                tracing::warn!(event = "hef_release_failed", status, "Releasing the HEF failed");
            }
        }
        Err(err) => {
            tracing::warn!(event = "hef_release_failed", error = %err, "Releasing the HEF failed")
        }
    }
}
