#![no_main]
#![no_std]

//! HAL wiring for an STM32F103 ("blue pill"-class) board: GPIO/timer/flash
//! peripherals in, [`trilift::supervisor::Supervisor`] calls out. Every
//! decision the appliance makes lives in `trilift`'s modules (host-tested);
//! this file only configures pins/clocks/interrupts and dispatches their
//! raw levels into the core.

use cortex_m::asm::delay as spin_delay;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use panic_halt as _;
use rtic::app;
use stm32f1xx_hal::flash::{self, FlashSize, SectorSize};
use stm32f1xx_hal::gpio::gpioc::{CRL, PC0, PC1, PC2, PC3, PC4, PC5};
use stm32f1xx_hal::gpio::gpiod::PD2;
use stm32f1xx_hal::gpio::{Edge, ExtiPin, Floating, Input, Output, PullUp, PushPull};
use stm32f1xx_hal::prelude::*;
use stm32f1xx_hal::{pac, timer};

use trilift::led::LedState;
use trilift::mode::Bias;
use trilift::nvram::Nvram;
use trilift::position::MotorCommand;
use trilift::supervisor::Supervisor;

/// Both learned thresholds live in the last page of a 64K (medium-density)
/// part's flash, read/written as an 8-byte record (offset 0 = middle,
/// offset 4 = top).
const NVRAM_PAGE_OFFSET: u32 = 0xFC00;

/// Flash-backed [`Nvram`]. A single page holds both persisted words, so a
/// write of either one has to read-modify-erase-rewrite the whole page:
/// unlike SRAM, flash can only be cleared a page at a time.
pub struct Stm32Nvram {
    flash: flash::Parts,
}

impl Stm32Nvram {
    pub fn new(flash: flash::Parts) -> Self {
        Stm32Nvram { flash }
    }

    fn writer(&mut self) -> flash::FlashWriter {
        self.flash.writer(SectorSize::Sz1K, FlashSize::Sz64K)
    }
}

impl Nvram for Stm32Nvram {
    fn read_u32(&self, offset: u32) -> i32 {
        // Reading is logically const from the caller's point of view; the
        // HAL's writer-borrows-everything API is the only reason this needs
        // a mutable view of `flash` at all.
        let flash_mut = unsafe { &mut *(&self.flash as *const flash::Parts as *mut flash::Parts) };
        let mut writer = flash_mut.writer(SectorSize::Sz1K, FlashSize::Sz64K);
        match writer.read(NVRAM_PAGE_OFFSET + offset, 4) {
            Ok(bytes) => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(bytes);
                i32::from_le_bytes(buf)
            }
            Err(_) => 0,
        }
    }

    fn write_u32(&mut self, offset: u32, value: i32) {
        let middle = if offset == 0 { value } else { self.read_u32(0) };
        let top = if offset == 4 { value } else { self.read_u32(4) };
        let mut writer = self.writer();
        let _ = writer.change_verification(false);
        if writer.page_erase(NVRAM_PAGE_OFFSET).is_err() {
            return;
        }
        let mut record = [0u8; 8];
        record[0..4].copy_from_slice(&middle.to_le_bytes());
        record[4..8].copy_from_slice(&top.to_le_bytes());
        let _ = writer.write(NVRAM_PAGE_OFFSET, &record);
    }
}

/// The mode-selector pin, switchable at runtime between the two bias
/// configurations the selector alternates between. `None` only while a swap
/// is in flight inside [`ModeTumbler::sync`].
enum TumblerPin {
    PullUp(PC3<Input<PullUp>>),
    Floating(PC3<Input<Floating>>),
}

impl TumblerPin {
    fn is_high(&self) -> bool {
        match self {
            TumblerPin::PullUp(p) => p.is_high().unwrap_or(false),
            TumblerPin::Floating(p) => p.is_high().unwrap_or(false),
        }
    }
}

/// The tri-state mode selector's two physical knobs: the tumbler pin's
/// internal pull-up, and the separate external pull-down-enable output.
/// [`Supervisor::mode_bias`] says which bias ought to be active;
/// [`ModeTumbler::sync`] makes the hardware match it.
pub struct ModeTumbler {
    pin: Option<TumblerPin>,
    crl: CRL,
    pull_down_enable: PC5<Output<PushPull>>,
}

impl ModeTumbler {
    fn new(pin: PC3<Input<PullUp>>, crl: CRL, pull_down_enable: PC5<Output<PushPull>>) -> Self {
        ModeTumbler {
            pin: Some(TumblerPin::PullUp(pin)),
            crl,
            pull_down_enable,
        }
    }

    fn is_high(&self) -> bool {
        self.pin.as_ref().map(TumblerPin::is_high).unwrap_or(true)
    }

    fn sync(&mut self, bias: Bias) {
        let pin = self.pin.take().expect("tumbler pin is always Some between calls");
        self.pin = Some(match (bias, pin) {
            (Bias::PullUp, TumblerPin::Floating(p)) => {
                let _ = self.pull_down_enable.set_low();
                TumblerPin::PullUp(p.into_pull_up_input(&mut self.crl))
            }
            (Bias::PullDown, TumblerPin::PullUp(p)) => {
                let p = p.into_floating_input(&mut self.crl);
                let _ = self.pull_down_enable.set_high();
                TumblerPin::Floating(p)
            }
            (_, unchanged) => unchanged,
        });
    }
}

/// The three position LEDs, written both from the tick ISR (blink toggle on
/// `next`) and from the foreground (solid state on `current`), hence a
/// single resource guarding all three pins.
pub struct Leds {
    bot: PC4<Output<PushPull>>,
    mid: PC0<Output<PushPull>>,
    top: PC1<Output<PushPull>>,
}

fn set(pin: &mut impl OutputPin, on: bool) {
    let _ = if on { pin.set_high() } else { pin.set_low() };
}

impl Leds {
    fn apply(&mut self, state: LedState) {
        set(&mut self.bot, state.bot);
        set(&mut self.mid, state.mid);
        set(&mut self.top, state.top);
    }
}

/// Motor relays and speed-select, owned exclusively by the foreground loop:
/// no ISR ever writes these pins directly.
pub struct Relays {
    up: stm32f1xx_hal::gpio::gpiod::PD7<Output<PushPull>>,
    down: stm32f1xx_hal::gpio::gpiod::PD6<Output<PushPull>>,
    speed: stm32f1xx_hal::gpio::gpiod::PD5<Output<PushPull>>,
}

impl Relays {
    fn apply(&mut self, cmd: MotorCommand) {
        set(&mut self.up, cmd.up);
        set(&mut self.down, cmd.down);
        set(&mut self.speed, cmd.speed == trilift::position::Speed::Full);
    }

    /// While blocked, forcibly de-energise both motor relays every
    /// iteration as a fail-safe.
    fn force_off(&mut self) {
        let _ = self.up.set_low();
        let _ = self.down.set_low();
    }
}

/// Buttons read once per tick by the tick ISR; never touched elsewhere.
pub struct ButtonPins {
    up: stm32f1xx_hal::gpio::gpiob::PB0<Input<PullUp>>,
    down: stm32f1xx_hal::gpio::gpiob::PB1<Input<PullUp>>,
    program: PC2<Input<PullUp>>,
}

/// Hall-effect sensor input, exclusive to the pulse ISR.
pub struct HallPin {
    pin: PD2<Input<Floating>>,
}

#[app(device = stm32f1xx_hal::pac, peripherals = true)]
mod app {
    use super::*;

    #[resources]
    struct Resources {
        supervisor: Supervisor<Stm32Nvram>,
        buttons: ButtonPins,
        hall: HallPin,
        tumbler: ModeTumbler,
        leds: Leds,
        relays: Relays,
        tick_timer: timer::CountDownTimer<pac::TIM2>,
        block_timer: timer::CountDownTimer<pac::TIM3>,
        settle_timer: timer::CountDownTimer<pac::TIM4>,
    }

    #[init]
    fn init(c: init::Context) -> (init::LateResources, init::Monotonics) {
        let mut flash = c.device.FLASH.constrain();
        let mut rcc = c.device.RCC.constrain();

        let clocks = rcc
            .cfgr
            .use_hse(8_u32.mhz())
            .sysclk(72_u32.mhz())
            .pclk1(36_u32.mhz())
            .freeze(&mut flash.acr);

        let mut gpiob = c.device.GPIOB.split(&mut rcc.apb2);
        let mut gpioc = c.device.GPIOC.split(&mut rcc.apb2);
        let mut gpiod = c.device.GPIOD.split(&mut rcc.apb2);
        let mut afio = c.device.AFIO.constrain(&mut rcc.apb2);

        let mut leds = Leds {
            bot: gpioc.pc4.into_push_pull_output(&mut gpioc.crl),
            mid: gpioc.pc0.into_push_pull_output(&mut gpioc.crl),
            top: gpioc.pc1.into_push_pull_output(&mut gpioc.crl),
        };

        let mut relays = Relays {
            up: gpiod.pd7.into_push_pull_output(&mut gpiod.crl),
            down: gpiod.pd6.into_push_pull_output(&mut gpiod.crl),
            speed: gpiod.pd5.into_push_pull_output(&mut gpiod.crl),
        };
        let _ = relays.speed.set_high(); // full speed until the supervisor picks a target

        let buttons = ButtonPins {
            up: gpiob.pb0.into_pull_up_input(&mut gpiob.crl),
            down: gpiob.pb1.into_pull_up_input(&mut gpiob.crl),
            program: gpioc.pc2.into_pull_up_input(&mut gpioc.crl),
        };

        let tumbler_pin = gpioc.pc3.into_pull_up_input(&mut gpioc.crl);
        let pull_down_enable = gpioc.pc5.into_push_pull_output(&mut gpioc.crl);
        let tumbler = ModeTumbler::new(tumbler_pin, gpioc.crl, pull_down_enable);

        let mut hall_pin = gpiod.pd2.into_floating_input(&mut gpiod.crl);
        hall_pin.make_interrupt_source(&mut afio);
        hall_pin.trigger_on_edge(&c.device.EXTI, Edge::FALLING);
        hall_pin.enable_interrupt(&c.device.EXTI);
        let hall = HallPin { pin: hall_pin };

        // Sample period ~1ms: the debouncer needs 8 samples to span a ~8ms
        // contact-bounce interval.
        let mut tick_timer =
            timer::Timer::tim2(c.device.TIM2, &clocks, &mut rcc.apb1).start_count_down(1.khz());
        tick_timer.listen(timer::Event::Update);

        // Block and settle get independent hardware timers rather than
        // sharing one multiplexed timer; this MCU has timers to spare, and
        // it keeps the two one-shots genuinely independent of each other.
        let mut block_timer =
            timer::Timer::tim3(c.device.TIM3, &clocks, &mut rcc.apb1).start_count_down(2.hz());
        block_timer.unlisten(timer::Event::Update);
        let mut settle_timer =
            timer::Timer::tim4(c.device.TIM4, &clocks, &mut rcc.apb1).start_count_down(20.hz());
        settle_timer.unlisten(timer::Event::Update);

        let nvram = Stm32Nvram::new(flash);
        let supervisor = Supervisor::new(nvram);

        // Boot LED animation: the only place this firmware spin-blocks.
        let _ = leds.top.set_high();
        spin_delay(clocks.sysclk().0 / 5);
        let _ = leds.top.set_low();
        let _ = leds.mid.set_high();
        spin_delay(clocks.sysclk().0 / 5);
        let _ = leds.mid.set_low();
        let _ = leds.bot.set_high();
        spin_delay(clocks.sysclk().0 / 5);
        let _ = leds.bot.set_low();

        leds.apply(supervisor.leds());

        (
            init::LateResources {
                supervisor,
                buttons,
                hall,
                tumbler,
                leds,
                relays,
                tick_timer,
                block_timer,
                settle_timer,
            },
            init::Monotonics(),
        )
    }

    /// Tick ISR: debounce every input, advance the blink phase, and read
    /// whichever mode-selector level is currently on offer.
    #[task(binds = TIM2, priority = 1, resources = [tick_timer, buttons, tumbler, supervisor, leds])]
    fn tick(mut c: tick::Context) {
        c.resources.tick_timer.lock(|t| t.clear_update_interrupt_flag());

        let up = c.resources.buttons.lock(|b| b.up.is_high().unwrap_or(true));
        let down = c.resources.buttons.lock(|b| b.down.is_high().unwrap_or(true));
        let program = c
            .resources
            .buttons
            .lock(|b| b.program.is_high().unwrap_or(true));
        let mode_level = c.resources.tumbler.lock(|t| t.is_high());

        let leds = c.resources.supervisor.lock(|sup| {
            sup.on_tick(up, down, program, mode_level);
            sup.leds()
        });
        c.resources.leds.lock(|l| l.apply(leds));
    }

    /// Pulse ISR: one Hall edge, signed by the currently commanded
    /// direction inside the position machine.
    #[task(binds = EXTI2, priority = 2, resources = [hall, supervisor])]
    fn pulse(mut c: pulse::Context) {
        c.resources.hall.lock(|h| h.pin.clear_interrupt_pending_bit());
        c.resources.supervisor.lock(|sup| sup.on_pulse());
    }

    /// Long-timer ISR, block half: unconditional, not cancellable.
    #[task(binds = TIM3, priority = 1, resources = [block_timer, supervisor])]
    fn block_expiry(mut c: block_expiry::Context) {
        c.resources.block_timer.lock(|t| {
            t.clear_update_interrupt_flag();
            t.unlisten(timer::Event::Update);
        });
        c.resources.supervisor.lock(|sup| sup.on_block_expiry());
    }

    /// Long-timer ISR, settle half: commits a MIDDLE stop reached by
    /// coasting with no button held.
    #[task(binds = TIM4, priority = 1, resources = [settle_timer, supervisor, leds])]
    fn settle_expiry(mut c: settle_expiry::Context) {
        c.resources.settle_timer.lock(|t| {
            t.clear_update_interrupt_flag();
            t.unlisten(timer::Event::Update);
        });
        let leds = c.resources.supervisor.lock(|sup| {
            sup.on_settle_expiry();
            sup.leds()
        });
        c.resources.leds.lock(|l| l.apply(leds));
    }

    /// Foreground loop. Services the mode sensor, PROGRAM button, and
    /// UP/DOWN autostop/safety logic each iteration, then starts/cancels the
    /// block and settle one-shots by polling whether the position machine
    /// just armed or disarmed them.
    #[idle(resources = [supervisor, tumbler, leds, relays, block_timer, settle_timer])]
    fn idle(mut c: idle::Context) -> ! {
        loop {
            let (was_blocked, was_settling) = c
                .resources
                .supervisor
                .lock(|sup| (sup.position().is_blocked(), sup.position().is_settling()));

            let cmd = c.resources.supervisor.lock(|sup| sup.service());

            let bias = c.resources.supervisor.lock(|sup| sup.mode_bias());
            c.resources.tumbler.lock(|t| t.sync(bias));

            let leds = c.resources.supervisor.lock(|sup| sup.leds());
            c.resources.leds.lock(|l| l.apply(leds));

            let (now_blocked, now_settling) = c
                .resources
                .supervisor
                .lock(|sup| (sup.position().is_blocked(), sup.position().is_settling()));

            if !was_blocked && now_blocked {
                c.resources.block_timer.lock(|t| {
                    t.start(2.hz());
                    t.listen(timer::Event::Update);
                });
            }
            if !was_settling && now_settling {
                c.resources.settle_timer.lock(|t| {
                    t.start(20.hz());
                    t.listen(timer::Event::Update);
                });
            } else if was_settling && !now_settling {
                c.resources.settle_timer.lock(|t| t.unlisten(timer::Event::Update));
            }

            c.resources.relays.lock(|r| {
                if now_blocked {
                    r.force_off();
                } else {
                    r.apply(cmd);
                }
            });
        }
    }
}
