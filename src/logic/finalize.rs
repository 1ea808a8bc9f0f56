//! Finalizer: branding, deferred scripts, input method session files,
//! home ownership and the final unmount.

use std::path::Path;

use crate::config::Configuration;
use crate::engine::storage::{self, MountState};
use crate::error::Result;
use crate::executor::{Executor, Invocation};
use crate::logic::boot::BootOutcome;
use crate::logic::deferred::deferred_scripts;
use crate::logic::resolver::KernelPlan;
use crate::logic::{in_target, run_optional, Warnings};
use crate::tools::system::{Chown, Cp, Symlink};
use crate::types::InputMethodEngine;

/// Numeric identity assumed for the first account when `/etc/passwd` has no answer
pub const FALLBACK_ID: (u32, u32) = (1000, 1000);

/// Look up `username` in passwd-format `contents`
pub fn parse_passwd_ids(contents: &str, username: &str) -> Option<(u32, u32)> {
    contents.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 4 || fields[0] != username {
            return None;
        }
        Some((fields[2].parse().ok()?, fields[3].parse().ok()?))
    })
}

/// Autostart entry for the engine's daemon
pub fn autostart_entry(engine: InputMethodEngine) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name={}\n\
         Exec={}\n\
         Terminal=false\n\
         Categories=Utility;\n\
         X-GNOME-Autostart-enabled=true\n",
        engine.display_name(),
        engine.daemon_command()
    )
}

/// systemd user unit running the engine's daemon in the graphical session
pub fn user_service(engine: InputMethodEngine) -> String {
    let module = engine.im_module();
    format!(
        "[Unit]\n\
         Description={}\n\
         After=graphical-session.target\n\
         PartOf=graphical-session.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={}\n\
         Restart=on-failure\n\
         RestartSec=3\n\
         Environment=\"GTK_IM_MODULE={module}\"\n\
         Environment=\"QT_IM_MODULE={module}\"\n\
         Environment=\"XMODIFIERS=@im={module}\"\n\
         \n\
         [Install]\n\
         WantedBy=graphical-session.target\n",
        engine.display_name(),
        engine.daemon_command()
    )
}

/// Shell exports for the engine's modules
pub fn profile_exports(engine: InputMethodEngine) -> String {
    let module = engine.im_module();
    format!("export GTK_IM_MODULE={module}\nexport QT_IM_MODULE={module}\nexport XMODIFIERS=@im={module}\n")
}

/// kime engine configuration: dubeolsik layout, Latin by default
pub const KIME_CONFIG: &str = r#"indicator:
  icon_color: Black

engine:
  default_category: Latin

  global_hotkeys:
    Alt_R:
      behavior: !Toggle
        - Hangul
        - Latin
      result: Consume
    Hangul:
      behavior: !Toggle
        - Hangul
        - Latin
      result: Consume
    Super-Space:
      behavior: !Toggle
        - Hangul
        - Latin
      result: Consume
    Esc:
      behavior: !Switch Latin
      result: Bypass

  hangul:
    layout: dubeolsik
    word_commit: false
    auto_reorder: true
"#;

/// KWin's Wayland input method selection for kime
pub const KIME_KWINRC: &str = "[Wayland]\nInputMethod[$e]=/usr/share/applications/kime.desktop\n";

/// Run the finalizer. Unmount is always attempted last and never affects the result.
pub fn finalize(
    exec: &mut dyn Executor,
    config: &Configuration,
    mount: &MountState,
    kernel: &KernelPlan,
    boot: &BootOutcome,
    warnings: &mut Warnings,
) -> Result<()> {
    let result = finalize_target(exec, config, mount, kernel, boot, warnings);
    if let Err(e) = &result {
        log::error!("Finalizing failed: {}", e);
    }
    storage::unmount(exec, mount);
    result
}

fn finalize_target(
    exec: &mut dyn Executor,
    config: &Configuration,
    mount: &MountState,
    kernel: &KernelPlan,
    boot: &BootOutcome,
    warnings: &mut Warnings,
) -> Result<()> {
    let root = mount.mount_point.as_path();
    let home = in_target(root, config.home_dir());

    copy_branding(exec, config, root, &home, warnings)?;

    for script in deferred_scripts(config, kernel, boot) {
        let path = home.join(script.name);
        exec.write_file(&path, &script.contents)?;
        exec.set_mode(&path, 0o755)?;
        log::info!("Created ~/{}", script.name);
    }

    if let Some(engine) = config.input_method_engine() {
        configure_input_method_session(exec, config, &home, engine)?;
    }

    fix_ownership(exec, config, root, &home, warnings)
}

/// Copy os-release and fastfetch assets from the live system. Missing sources are skipped.
fn copy_branding(
    exec: &mut dyn Executor,
    config: &Configuration,
    root: &Path,
    home: &Path,
    warnings: &mut Warnings,
) -> Result<()> {
    let branding = &config.branding;

    if exec.exists(&branding.fastfetch_dir) {
        let system_dir = in_target(root, "/etc/fastfetch");
        let user_dir = home.join(".config/fastfetch");
        for dest in [&system_dir, &user_dir] {
            exec.create_dir_all(dest)?;
            run_optional(
                exec,
                &Invocation::tool(&Cp {
                    source: format!("{}/.", branding.fastfetch_dir.display()),
                    dest: dest.display().to_string(),
                    recursive: true,
                }),
                warnings,
            );
        }
    } else {
        log::info!("No fastfetch assets at {}", branding.fastfetch_dir.display());
    }

    if exec.exists(&branding.os_release) {
        for dest in ["/etc/os-release", "/usr/lib/os-release"] {
            let dest = in_target(root, dest);
            if let Some(parent) = dest.parent() {
                exec.create_dir_all(parent)?;
            }
            run_optional(
                exec,
                &Invocation::tool(&Cp {
                    source: branding.os_release.display().to_string(),
                    dest: dest.display().to_string(),
                    recursive: false,
                }),
                warnings,
            );
        }
    }

    log::info!("{} branding configured", branding.name);
    Ok(())
}

fn configure_input_method_session(
    exec: &mut dyn Executor,
    config: &Configuration,
    home: &Path,
    engine: InputMethodEngine,
) -> Result<()> {
    let name = engine.to_string();
    let config_dir = home.join(".config");

    exec.write_file(
        &config_dir.join(format!("autostart/{name}.desktop")),
        &autostart_entry(engine),
    )?;

    let unit_dir = config_dir.join("systemd/user");
    let wants_dir = unit_dir.join("graphical-session.target.wants");
    exec.write_file(&unit_dir.join(format!("{name}.service")), &user_service(engine))?;
    exec.create_dir_all(&wants_dir)?;
    exec.run_tool(&Symlink {
        target: format!("../{name}.service"),
        link: wants_dir.join(format!("{name}.service")).display().to_string(),
    })?
    .ensure_success("Enabling input method user service")?;

    let exports = profile_exports(engine);
    exec.append_file(
        &home.join(".bash_profile"),
        &format!(
            "\n# {}\n{exports}export LANG={}.UTF-8\n",
            engine.display_name(),
            config.primary_language()
        ),
    )?;
    exec.write_file(&home.join(".xprofile"), &exports)?;

    if engine == InputMethodEngine::Kime {
        exec.write_file(&config_dir.join("kime/config.yaml"), KIME_CONFIG)?;

        let kwinrc = config_dir.join("kwinrc");
        if exec.exists(&kwinrc) {
            exec.append_file(&kwinrc, &format!("\n{KIME_KWINRC}"))?;
        } else {
            exec.write_file(&kwinrc, KIME_KWINRC)?;
        }
    }

    log::info!("{} session configured", engine.display_name());
    Ok(())
}

/// Hand the home directory to the account's numeric identity
fn fix_ownership(
    exec: &mut dyn Executor,
    config: &Configuration,
    root: &Path,
    home: &Path,
    warnings: &mut Warnings,
) -> Result<()> {
    let username = config.install.username.trim();
    let passwd = exec.read_to_string(&in_target(root, "/etc/passwd"))?;
    let (uid, gid) = match parse_passwd_ids(&passwd, username) {
        Some(ids) => ids,
        None => {
            warnings.warn(format!(
                "{username} not found in /etc/passwd, assuming {}:{}",
                FALLBACK_ID.0, FALLBACK_ID.1
            ));
            FALLBACK_ID
        }
    };

    exec.run_tool(&Chown {
        uid,
        gid,
        path: home.display().to_string(),
        recursive: true,
    })?
    .ensure_success("Fixing home ownership")?;

    exec.set_mode(home, 0o700)?;
    let config_dir = home.join(".config");
    if exec.exists(&config_dir) {
        exec.set_mode(&config_dir, 0o700)?;
    }

    log::info!("Home directory owned by {}:{}", uid, gid);
    Ok(())
}
