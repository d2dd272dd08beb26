#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Instant, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info};

use sentinel_core::app_state::{AppScheduler, AppState, register_tasks};
use sentinel_core::automation::GpioActuators;
use sentinel_core::config::MonitorConfig;
use sentinel_core::sensors::Gp2y1010;
use sentinel_firmware::board::{BoardInterface, EmbassyClock, EspAdcChannel};
use sentinel_firmware::input::BootButton;
use sentinel_firmware::sd_store::{FixedTime, SdStore};

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Air-Sentinel starting");

    // SD card on SPI2. Cards must be initialised at <= 400 kHz, then the
    // bus is raised for data transfers.
    let spi_bus = Spi::new(
        peripherals.SPI2,
        SpiConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .expect("Failed to configure SPI2")
    .with_sck(peripherals.GPIO12)
    .with_mosi(peripherals.GPIO11)
    .with_miso(peripherals.GPIO13);
    let sd_cs = Output::new(peripherals.GPIO10, Level::High, OutputConfig::default());
    let sd_spi = ExclusiveDevice::new_no_delay(spi_bus, sd_cs).expect("Failed to claim SD chip select");
    let sd_card = embedded_sdmmc::SdCard::new(sd_spi, Delay::new());
    match sd_card.num_bytes() {
        Ok(bytes) => {
            info!("SD card ready, {} MiB", bytes / (1024 * 1024));
            let fast = SpiConfig::default().with_frequency(Rate::from_mhz(20));
            if let Err(e) = sd_card.spi(|dev| dev.bus_mut().apply_config(&fast)) {
                error!("SPI2 left at 400 kHz: {:?}", e);
            }
        }
        Err(e) => error!("SD card not ready, calibration will not persist: {:?}", e),
    }
    let store = SdStore::new(sd_card, FixedTime);

    let (config, config_error) = MonitorConfig::or_default(store.load_config());

    // Dust sensor: analog output on ADC1, IR LED idles high.
    let mut adc_config = AdcConfig::new();
    let dust_pin = adc_config.enable_pin(peripherals.GPIO8, Attenuation::_11dB);
    let adc = Adc::new(peripherals.ADC1, adc_config);
    let led = Output::new(peripherals.GPIO9, Level::High, OutputConfig::default());
    let sensor = Gp2y1010::new(led, EspAdcChannel::new(adc, dust_pin), Delay::new());

    let band_pins = [
        Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO3, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO4, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO5, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO6, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO7, Level::Low, OutputConfig::default()),
    ];
    let actuators = GpioActuators::new(band_pins).expect("Failed to release band outputs");

    let button = Input::new(
        peripherals.GPIO0,
        InputConfig::default().with_pull(Pull::Up),
    );
    let interface = BoardInterface::new(BootButton::new(button));

    let clock = EmbassyClock;
    let boot = Instant::now();
    let mut app = AppState::new(config, sensor, actuators, store, interface, boot)
        .expect("Band table does not match the band outputs");
    if let Some(e) = config_error {
        app.record_config_failure(&e);
    }

    let mut scheduler = AppScheduler::new();
    register_tasks(&config, &mut scheduler, boot).expect("Task table does not fit");

    info!(
        "Offset {:.4}, scheduler running {} tasks",
        app.current_offset().value,
        scheduler.tasks().count()
    );

    loop {
        scheduler.run_pending(&mut app, &clock);

        match scheduler.next_wake() {
            Some(wake) => Timer::at(wake).await,
            None => {
                error!("Every task is disabled");
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    }
}
