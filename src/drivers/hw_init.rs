//! Pulse-input GPIO and edge interrupt setup.
//!
//! Configures the CF and CF1 pins as plain inputs with a rising-edge
//! interrupt and registers one ISR per pin through the ESP-IDF GPIO ISR
//! service.  Each ISR receives its [`PulseLine`] as the opaque argument
//! (a leaked [`EdgeHandle`] reference), so no global state is involved
//! and several meters can be bound to different pins.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
use log::info;

use crate::error::GpioError;
use crate::sensors::{EdgeHandle, LineId, PulseLine};

/// Edge interrupts bound for one meter.  Dropping it detaches them.
pub struct PulseInterrupts {
    bound: [(i32, *const PulseLine); LineId::COUNT],
    attached: bool,
}

// SAFETY: the raw pointers are strong `Arc` references to `Sync` lines;
// they are only dereferenced by the ISR and reclaimed in `unbind`.
unsafe impl Send for PulseInterrupts {}

/// Rising-edge ISR.  Runs in interrupt context: lock-free, no allocation,
/// no logging.
#[cfg(target_os = "espidf")]
unsafe extern "C" fn pulse_gpio_isr(arg: *mut core::ffi::c_void) {
    // SAFETY: `arg` is a live `Arc<PulseLine>` leaked by `bind_pulse_interrupts`
    // and not reclaimed until the handler has been removed.
    let line = unsafe { &*(arg as *const PulseLine) };
    let now = unsafe { esp_timer_get_time() } as u32;
    line.record_edge(now);
}

/// Configure `cf_pin` / `cf1_pin` and attach the edge handlers.
///
/// Installs the GPIO ISR service if nobody has yet.
pub fn bind_pulse_interrupts(
    cf_pin: i32,
    cf: EdgeHandle,
    cf1_pin: i32,
    cf1: EdgeHandle,
) -> Result<PulseInterrupts, GpioError> {
    let irq = PulseInterrupts {
        bound: [(cf_pin, cf.into_raw()), (cf1_pin, cf1.into_raw())],
        attached: false,
    };
    // From here on, dropping `irq` reclaims the references.
    irq.attach()
}

impl PulseInterrupts {
    #[cfg(target_os = "espidf")]
    fn attach(mut self) -> Result<Self, GpioError> {
        // SAFETY: called from the main task; the handler arguments outlive
        // the registration (see `unbind`).
        unsafe {
            let ret = gpio_install_isr_service(0);
            if ret != ESP_OK as esp_err_t && ret != ESP_ERR_INVALID_STATE as esp_err_t {
                return Err(GpioError::IsrInstallFailed(ret));
            }
            for (pin, line) in self.bound {
                let cfg = gpio_config_t {
                    pin_bit_mask: 1u64 << pin,
                    mode: gpio_mode_t_GPIO_MODE_INPUT,
                    pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
                    pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
                    intr_type: gpio_int_type_t_GPIO_INTR_POSEDGE,
                };
                let ret = gpio_config(&cfg);
                if ret != ESP_OK as esp_err_t {
                    return Err(GpioError::IsrInstallFailed(ret));
                }
                let ret = gpio_isr_handler_add(pin, Some(pulse_gpio_isr), line as *mut _);
                if ret != ESP_OK as esp_err_t {
                    return Err(GpioError::IsrInstallFailed(ret));
                }
            }
            self.attached = true;
        }
        info!(
            "hw_init: pulse ISRs attached (CF=GPIO{}, CF1=GPIO{})",
            self.bound[0].0, self.bound[1].0
        );
        Ok(self)
    }

    #[cfg(not(target_os = "espidf"))]
    fn attach(mut self) -> Result<Self, GpioError> {
        self.attached = true;
        info!(
            "hw_init(sim): pulse ISRs skipped (CF=GPIO{}, CF1=GPIO{})",
            self.bound[0].0, self.bound[1].0
        );
        Ok(self)
    }

    /// Remove the handlers and release the line references.
    pub fn unbind(self) {
        drop(self);
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl Drop for PulseInterrupts {
    fn drop(&mut self) {
        for (pin, line) in self.bound {
            #[cfg(target_os = "espidf")]
            // SAFETY: removing a handler that may not exist is harmless;
            // after it returns the ISR no longer sees `line`.
            unsafe {
                gpio_isr_handler_remove(pin);
            }
            #[cfg(not(target_os = "espidf"))]
            let _ = pin;
            // SAFETY: `line` came from `EdgeHandle::into_raw` in
            // `bind_pulse_interrupts` and is reclaimed exactly once here.
            drop(unsafe { EdgeHandle::from_raw(line) });
        }
        if self.attached {
            info!("hw_init: pulse ISRs detached");
        }
    }
}
