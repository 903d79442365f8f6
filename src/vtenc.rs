//! VideoToolbox encoder backend for macOS.
//!
//! Compresses BGRA frames with Apple's hardware encoder. Completed pictures
//! are handed to the bound [`CompressionOutputHandler`] still in
//! length-prefixed form, together with a retained format description on
//! keyframes, so the recorder can do the Annex B reframing itself.

use std::ffi::c_void;
use std::sync::Arc;

use annexb_codec::{
    Codec, CodecError, CompressedSample, CompressionOutputHandler, EncoderConfig, EncoderFactory,
    EncoderOutput, FormatDescription, ParameterSetRef, PixelFormat, ProfileLevel, RawFrame,
    VideoEncoder, STATUS_OK,
};
use bytes::Bytes;
use core_foundation::array::CFArray;
use core_foundation::base::TCFType;
use core_foundation::number::CFNumber;
use core_foundation_sys::base::{CFRelease, CFRetain, OSStatus};
use core_foundation_sys::string::CFStringRef;
use core_media_sys::{CMSampleBufferRef, CMTime};
use video_toolbox_sys::compression::{
    VTCompressionSessionCompleteFrames, VTCompressionSessionEncodeFrame,
    VTCompressionSessionInvalidate, VTCompressionSessionRef,
};
use video_toolbox_sys::helpers::{
    create_pixel_buffer, CompressionSessionBuilder, NalExtractor, PixelBufferConfig,
    PixelBufferGuard,
};

/// `kVTEncodeInfo_FrameDropped`
const INFO_FRAME_DROPPED: u32 = 1 << 1;

const CM_TIME_FLAGS_VALID: u32 = 1;

#[allow(non_upper_case_globals, non_snake_case)]
mod ffi {
    use super::*;

    #[link(name = "CoreMedia", kind = "framework")]
    extern "C" {
        pub fn CMSampleBufferDataIsReady(sbuf: *const c_void) -> u8;
        pub fn CMSampleBufferGetDataBuffer(sbuf: *const c_void) -> *const c_void;
        pub fn CMSampleBufferGetPresentationTimeStamp(sbuf: *const c_void) -> CMTime;
        pub fn CMBlockBufferGetDataLength(buf: *const c_void) -> usize;
        pub fn CMBlockBufferCopyDataBytes(
            buf: *const c_void,
            offset: usize,
            length: usize,
            destination: *mut c_void,
        ) -> OSStatus;
        pub fn CMVideoFormatDescriptionGetH264ParameterSetAtIndex(
            desc: *const c_void,
            index: usize,
            pointer_out: *mut *const u8,
            size_out: *mut usize,
            count_out: *mut usize,
            nal_header_length_out: *mut i32,
        ) -> OSStatus;
        pub fn CMVideoFormatDescriptionGetHEVCParameterSetAtIndex(
            desc: *const c_void,
            index: usize,
            pointer_out: *mut *const u8,
            size_out: *mut usize,
            count_out: *mut usize,
            nal_header_length_out: *mut i32,
        ) -> OSStatus;
    }

    #[link(name = "VideoToolbox", kind = "framework")]
    extern "C" {
        pub static kVTProfileLevel_H264_Baseline_AutoLevel: CFStringRef;
        pub static kVTProfileLevel_H264_Main_AutoLevel: CFStringRef;
        pub static kVTProfileLevel_H264_High_AutoLevel: CFStringRef;
        pub static kVTProfileLevel_HEVC_Main_AutoLevel: CFStringRef;
        pub static kVTCompressionPropertyKey_DataRateLimits: CFStringRef;

        pub fn VTSessionSetProperty(
            session: *mut c_void,
            key: CFStringRef,
            value: *const c_void,
        ) -> OSStatus;
        pub fn VTCompressionSessionPrepareToEncodeFrames(session: *mut c_void) -> OSStatus;
    }
}

fn invalid_time() -> CMTime {
    CMTime {
        value: 0,
        timescale: 0,
        flags: 0, // kCMTimeFlags_Invalid
        epoch: 0,
    }
}

fn time_from_us(us: u64) -> CMTime {
    CMTime {
        value: us as i64,
        timescale: 1_000_000,
        flags: CM_TIME_FLAGS_VALID,
        epoch: 0,
    }
}

fn time_to_us(time: CMTime) -> u64 {
    if time.flags & CM_TIME_FLAGS_VALID == 0 || time.timescale <= 0 || time.value < 0 {
        return 0;
    }
    (time.value as i128 * 1_000_000 / time.timescale as i128) as u64
}

unsafe fn profile_level_key(codec: Codec, profile: ProfileLevel) -> CFStringRef {
    match (codec, profile) {
        (Codec::Hevc, _) => ffi::kVTProfileLevel_HEVC_Main_AutoLevel,
        (Codec::H264, ProfileLevel::Main) => ffi::kVTProfileLevel_H264_Main_AutoLevel,
        (Codec::H264, ProfileLevel::High) => ffi::kVTProfileLevel_H264_High_AutoLevel,
        (Codec::H264, ProfileLevel::Baseline) => ffi::kVTProfileLevel_H264_Baseline_AutoLevel,
    }
}

/// A retained `CMFormatDescription`.
struct VtFormatDescription {
    desc: *const c_void,
}

// Safety: CoreMedia format descriptions are immutable once created and
// reference counted, so a retained one may be read from any thread.
unsafe impl Send for VtFormatDescription {}

impl VtFormatDescription {
    /// Retain `desc` so it stays valid after the output callback returns.
    unsafe fn retain(desc: *const c_void) -> Self {
        CFRetain(desc);
        Self { desc }
    }
}

impl Drop for VtFormatDescription {
    fn drop(&mut self) {
        unsafe { CFRelease(self.desc) }
    }
}

impl FormatDescription for VtFormatDescription {
    fn parameter_set_at(
        &self,
        codec: Codec,
        index: usize,
    ) -> Result<ParameterSetRef<'_>, CodecError> {
        let mut pointer: *const u8 = std::ptr::null();
        let mut size = 0usize;
        let mut count = 0usize;
        let mut header_length = 0i32;

        let status = unsafe {
            match codec {
                Codec::H264 => ffi::CMVideoFormatDescriptionGetH264ParameterSetAtIndex(
                    self.desc,
                    index,
                    &mut pointer,
                    &mut size,
                    &mut count,
                    &mut header_length,
                ),
                Codec::Hevc => ffi::CMVideoFormatDescriptionGetHEVCParameterSetAtIndex(
                    self.desc,
                    index,
                    &mut pointer,
                    &mut size,
                    &mut count,
                    &mut header_length,
                ),
            }
        };
        if status != 0 || pointer.is_null() {
            return Err(CodecError::ParameterSetQuery { index, status });
        }

        // The bytes live as long as the retained description.
        let data = unsafe { std::slice::from_raw_parts(pointer, size) };
        Ok(ParameterSetRef { data, count })
    }
}

/// Copy the sample's block buffer, which may be non-contiguous.
unsafe fn copy_sample_data(sample_buffer: *const c_void) -> Option<Vec<u8>> {
    let block = ffi::CMSampleBufferGetDataBuffer(sample_buffer);
    if block.is_null() {
        return None;
    }
    let length = ffi::CMBlockBufferGetDataLength(block);
    let mut data = vec![0u8; length];
    let status = ffi::CMBlockBufferCopyDataBytes(block, 0, length, data.as_mut_ptr() as *mut c_void);
    if status != 0 {
        tracing::warn!("CMBlockBufferCopyDataBytes failed: OSStatus {}", status);
        return None;
    }
    Some(data)
}

unsafe fn read_sample(sample_buffer: *const c_void) -> Option<CompressedSample> {
    if ffi::CMSampleBufferDataIsReady(sample_buffer) == 0 {
        tracing::warn!("Sample buffer data not ready");
        return None;
    }

    let extractor = NalExtractor::new();
    // Reads the first sample attachment only; VideoToolbox attaches one
    // dictionary per compressed picture.
    let is_keyframe = extractor.is_keyframe(sample_buffer as CMSampleBufferRef);
    let data = copy_sample_data(sample_buffer)?;
    let pts_us = time_to_us(ffi::CMSampleBufferGetPresentationTimeStamp(sample_buffer));

    let format = if is_keyframe {
        extractor
            .get_format_description(sample_buffer as CMSampleBufferRef)
            .map(|desc| {
                Box::new(VtFormatDescription::retain(desc as *const c_void))
                    as Box<dyn FormatDescription>
            })
    } else {
        None
    };

    Some(CompressedSample {
        data: Bytes::from(data),
        is_keyframe,
        pts_us,
        format,
    })
}

fn on_compressed(
    handler: &dyn CompressionOutputHandler,
    status: OSStatus,
    info_flags: u32,
    sample_buffer: *const c_void,
) {
    if status != 0 {
        handler.on_output(EncoderOutput::failed(status));
        return;
    }
    if info_flags & INFO_FRAME_DROPPED != 0 {
        handler.on_output(EncoderOutput::dropped());
        return;
    }

    let sample = if sample_buffer.is_null() {
        None
    } else {
        unsafe { read_sample(sample_buffer) }
    };
    handler.on_output(EncoderOutput {
        status: STATUS_OK,
        dropped: false,
        sample,
    });
}

/// VideoToolbox H.264/HEVC encoder.
pub struct VtEncoder {
    session: VTCompressionSessionRef,
    codec: Codec,
    width: u32,
    height: u32,
    frame_count: u64,
}

// Safety: the controller serializes every call through a Mutex. The
// compression callback runs on its own thread but only talks to the handler.
unsafe impl Send for VtEncoder {}

impl VtEncoder {
    /// Create and configure a compression session.
    pub fn new(
        config: &EncoderConfig,
        handler: Arc<dyn CompressionOutputHandler>,
    ) -> Result<Self, CodecError> {
        config.validate()?;

        let profile = unsafe { profile_level_key(config.codec, config.profile_level) };
        let session = CompressionSessionBuilder::new(
            config.width as i32,
            config.height as i32,
            config.codec.fourcc(),
        )
        .hardware_accelerated(true)
        .real_time(config.real_time)
        .bitrate(config.average_bitrate as i64)
        .keyframe_interval(config.max_keyframe_interval as i32)
        .profile_level(profile)
        .build(move |_output_ref, _source_ref, status: OSStatus, info_flags, sample_buffer_ptr| {
            on_compressed(
                handler.as_ref(),
                status,
                info_flags as u32,
                sample_buffer_ptr as *const c_void,
            );
        })
        .map_err(|status| CodecError::SessionCreate { status })?;

        let encoder = VtEncoder {
            session,
            codec: config.codec,
            width: config.width,
            height: config.height,
            frame_count: 0,
        };
        // From here on, Drop invalidates the session if configuration fails.
        encoder.set_data_rate_limit(config)?;

        let status = unsafe { ffi::VTCompressionSessionPrepareToEncodeFrames(encoder.session as *mut c_void) };
        if status != 0 {
            return Err(CodecError::PropertyConfig {
                property: "PrepareToEncodeFrames",
                status,
            });
        }

        tracing::info!(
            "VideoToolbox {} session ready: {}x{}",
            config.codec.name(),
            config.width,
            config.height
        );
        Ok(encoder)
    }

    fn set_data_rate_limit(&self, config: &EncoderConfig) -> Result<(), CodecError> {
        let limit = config.data_rate_limit;
        let values = CFArray::from_CFTypes(&[
            CFNumber::from(limit.bytes as i64).as_CFType(),
            CFNumber::from(limit.seconds as i32).as_CFType(),
        ]);
        let status = unsafe {
            ffi::VTSessionSetProperty(
                self.session as *mut c_void,
                ffi::kVTCompressionPropertyKey_DataRateLimits,
                values.as_CFTypeRef(),
            )
        };
        if status != 0 {
            return Err(CodecError::PropertyConfig {
                property: "DataRateLimits",
                status,
            });
        }
        Ok(())
    }

    /// Frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl VideoEncoder for VtEncoder {
    fn submit(&mut self, frame: &RawFrame<'_>) -> Result<(), CodecError> {
        if frame.pixel_format != PixelFormat::Bgra {
            return Err(CodecError::UnsupportedPixelFormat);
        }
        if (frame.width, frame.height) != (self.width, self.height) {
            return Err(CodecError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            });
        }

        let config = PixelBufferConfig::new(self.width as usize, self.height as usize);
        let pixel_buffer = create_pixel_buffer(&config).map_err(|e| {
            CodecError::generic(format!("failed to create pixel buffer: CVReturn {}", e))
        })?;

        unsafe {
            let guard = match PixelBufferGuard::lock(pixel_buffer) {
                Ok(guard) => guard,
                Err(e) => {
                    CFRelease(pixel_buffer as _);
                    return Err(CodecError::generic(format!(
                        "failed to lock pixel buffer: CVReturn {}",
                        e
                    )));
                }
            };

            let dst = guard.base_address();
            let dst_stride = guard.bytes_per_row();
            let src_stride = self.width as usize * 4;
            for y in 0..self.height as usize {
                let src_offset = y * src_stride;
                let dst_offset = y * dst_stride;
                if src_offset + src_stride <= frame.data.len() {
                    std::ptr::copy_nonoverlapping(
                        frame.data.as_ptr().add(src_offset),
                        dst.add(dst_offset),
                        src_stride,
                    );
                }
            }

            drop(guard); // Unlock before encoding

            let duration = frame.duration_us.map_or_else(invalid_time, time_from_us);
            let status = VTCompressionSessionEncodeFrame(
                self.session,
                pixel_buffer,
                time_from_us(frame.timestamp_us),
                duration,
                std::ptr::null(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            );

            CFRelease(pixel_buffer as _);

            if status != 0 {
                return Err(CodecError::Submit { status });
            }
        }

        self.frame_count += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        let status = unsafe { VTCompressionSessionCompleteFrames(self.session, invalid_time()) };
        if status != 0 {
            return Err(CodecError::Flush { status });
        }
        tracing::debug!("Completed {} frames", self.frame_count);
        Ok(())
    }

    fn codec(&self) -> Codec {
        self.codec
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for VtEncoder {
    fn drop(&mut self) {
        if !self.session.is_null() {
            unsafe {
                VTCompressionSessionInvalidate(self.session);
                CFRelease(self.session as _);
            }
        }
    }
}

/// Creates [`VtEncoder`] sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct VtEncoderFactory;

impl EncoderFactory for VtEncoderFactory {
    type Encoder = VtEncoder;

    fn create(
        &self,
        config: &EncoderConfig,
        handler: Arc<dyn CompressionOutputHandler>,
    ) -> Result<VtEncoder, CodecError> {
        VtEncoder::new(config, handler)
    }
}
