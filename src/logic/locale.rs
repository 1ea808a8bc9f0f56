//! Locale generation, console keymap and system-wide input-method variables.

use crate::config::{Configuration, FALLBACK_LOCALE};
use crate::engine::storage::MountState;
use crate::error::Result;
use crate::executor::{Executor, Invocation};
use crate::logic::{in_target, run_optional, Warnings};
use crate::tools::system::LocaleGen;
use crate::types::InputMethodEngine;

/// System-wide input method environment file
pub const INPUT_METHOD_ENV: &str = "/etc/environment.d/input-method.conf";

/// `locale.gen` lines for the requested locales, always including the fallback
pub fn locale_gen_entries(languages: &[String]) -> String {
    let mut entries = String::new();
    for lang in languages {
        entries.push_str(&format!("{lang}.UTF-8 UTF-8\n"));
    }
    if !languages.iter().any(|l| l == FALLBACK_LOCALE) {
        entries.push_str(&format!("{FALLBACK_LOCALE}.UTF-8 UTF-8\n"));
    }
    entries
}

/// Contents of the input method environment file
pub fn input_method_environment(engine: InputMethodEngine) -> String {
    let module = engine.im_module();
    let title = match engine {
        InputMethodEngine::Kime => "Kime Korean Input Method",
        InputMethodEngine::Fcitx5 => "Fcitx5 Input Method",
        InputMethodEngine::Ibus => "IBus Input Method",
    };
    format!("\n# {title}\nGTK_IM_MODULE={module}\nQT_IM_MODULE={module}\nXMODIFIERS=@im={module}\n")
}

/// Generate locales, write `LANG=` and `KEYMAP=`, and export input method variables.
pub fn configure_locale(
    exec: &mut dyn Executor,
    config: &Configuration,
    mount: &MountState,
    warnings: &mut Warnings,
) -> Result<()> {
    let root = mount.mount_point.as_path();
    let languages = config.languages();

    exec.append_file(&in_target(root, "/etc/locale.gen"), &locale_gen_entries(&languages))?;
    run_optional(exec, &Invocation::tool(&LocaleGen).in_chroot(root), warnings);

    exec.write_file(
        &in_target(root, "/etc/locale.conf"),
        &format!("LANG={}.UTF-8\n", config.primary_language()),
    )?;

    if let Some(keymap) = config.locale.keyboards.iter().map(|k| k.trim()).find(|k| !k.is_empty()) {
        exec.write_file(&in_target(root, "/etc/vconsole.conf"), &format!("KEYMAP={keymap}\n"))?;
    }

    if let Some(engine) = config.input_method_engine() {
        log::info!("Configuring {} environment", engine.display_name());
        exec.write_file(&in_target(root, INPUT_METHOD_ENV), &input_method_environment(engine))?;
    }

    Ok(())
}
