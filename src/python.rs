//! Python module `daq`, keeping the call signatures existing acquisition scripts use.

use crate::channel::ChannelSetting;
use crate::driver::TriggerDirection;
use crate::session::{AcquisitionConfig, ChannelConfig};
use crate::Ps6000Driver;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn channel(trigger_mv: i16, range_code: u16, post_trigger: u16) -> PyResult<ChannelConfig> {
    let setting = ChannelSetting::from_host_code(range_code)
        .ok_or_else(|| PyValueError::new_err(format!("unknown range code {range_code}")))?;
    Ok(ChannelConfig {
        setting,
        trigger_mv,
        post_trigger,
    })
}

#[pyfunction]
#[pyo3(name = "runDAQ")]
#[allow(clippy::too_many_arguments)]
fn run_daq(
    py: Python<'_>,
    output_file: &str,
    ch_a_trigger: i16,
    ch_a_vrange: u16,
    ch_a_wf_samples: u16,
    ch_b_trigger: i16,
    ch_b_vrange: u16,
    ch_b_wf_samples: u16,
    ch_c_trigger: i16,
    ch_c_vrange: u16,
    ch_c_wf_samples: u16,
    ch_d_trigger: i16,
    ch_d_vrange: u16,
    ch_d_wf_samples: u16,
    aux_trigger: i16,
    timebase: u8,
    num_waveforms: u32,
    samples_pre_trigger: u16,
    serial: &str,
) -> PyResult<i32> {
    let config = AcquisitionConfig {
        channels: [
            channel(ch_a_trigger, ch_a_vrange, ch_a_wf_samples)?,
            channel(ch_b_trigger, ch_b_vrange, ch_b_wf_samples)?,
            channel(ch_c_trigger, ch_c_vrange, ch_c_wf_samples)?,
            channel(ch_d_trigger, ch_d_vrange, ch_d_wf_samples)?,
        ],
        aux_trigger_mv: aux_trigger,
        timebase: u32::from(timebase),
        waveforms: num_waveforms,
        pre_trigger: samples_pre_trigger,
        serial: Some(serial.to_owned()),
        direction: TriggerDirection::Rising,
        auto_trigger_ms: 0,
    };
    // the capture blocks until every waveform is in, let other Python threads run meanwhile
    py.allow_threads(|| crate::run_daq(&Ps6000Driver, output_file, &config))
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    Ok(1)
}

#[pyfunction]
#[pyo3(name = "getSerials")]
fn get_serials(py: Python<'_>) -> PyResult<String> {
    py.allow_threads(|| crate::get_serials(&Ps6000Driver))
        .map(|list| list.raw)
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

#[pymodule]
#[pyo3(name = "daq")]
fn daq_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__doc__", "Picoscope DAQ System")?;
    m.add_function(wrap_pyfunction!(run_daq, m)?)?;
    m.add_function(wrap_pyfunction!(get_serials, m)?)?;
    Ok(())
}
