//! Package catalogues for the base installation pass.
//!
//! Lists are kept as constants so tests can check them without a running
//! system. Anything not available from the official repositories belongs in
//! the deferred scripts, never here.
//!
//! | Catalogue        | Installed when |
//! |------------------|----------------|
//! | `BASE_PACKAGES`  | always |
//! | `bootloader_packages::GRUB` | a GRUB strategy is resolved |
//! | `DESKTOP_PACKAGES` | `packages.desktop` is set |
//! | `font_packages`  | always; CJK fonts when a CJK locale is requested |
//! | `input_method_packages` | input methods are enabled |
//! | `gpu_packages`   | the matching hardware is detected after pacstrap |

/// Base system packages always installed. The kernel comes from `KernelPlan`.
pub const BASE_PACKAGES: &[&str] = &[
    "base",
    "linux-firmware",
    "base-devel",
    "sudo",
    "nano",
    "vim",
    "networkmanager",
    "network-manager-applet",
    "efibootmgr",
    "dosfstools",
    "ntfs-3g",
    "btrfs-progs",
    "cryptsetup",
    "intel-ucode",
    "amd-ucode",
    "mesa",
    "vulkan-icd-loader",
    "pciutils",
    "git",
    "wget",
    "curl",
    "fastfetch",
    "htop",
    "man-db",
    "man-pages",
];

/// Bootloader packages.
pub mod bootloader_packages {
    /// GRUB (BIOS or UEFI target)
    pub const GRUB: &[&str] = &["grub", "os-prober"];

    /// Direct boot only needs `efibootmgr`, which is in the base set
    pub const DIRECT_BOOT: &[&str] = &[];
}

/// KDE Plasma desktop with display manager, audio and printing.
pub const DESKTOP_PACKAGES: &[&str] = &[
    "xorg-server",
    "xorg-xinit",
    "wayland",
    "plasma-meta",
    "sddm",
    "konsole",
    "dolphin",
    "kate",
    "ark",
    "gwenview",
    "okular",
    "spectacle",
    "kwalletmanager",
    "kcalc",
    "plasma-systemmonitor",
    "kde-gtk-config",
    "kio-extras",
    "kdegraphics-thumbnailers",
    "ffmpegthumbs",
    "plasma-pa",
    "plasma-nm",
    "plasma-firewall",
    "partitionmanager",
    "filelight",
    "ksystemlog",
    "pipewire",
    "pipewire-alsa",
    "pipewire-pulse",
    "pipewire-jack",
    "wireplumber",
    "cups",
    "print-manager",
];

/// Font packages by locale.
pub mod font_packages {
    pub const COMMON: &[&str] = &["noto-fonts", "noto-fonts-emoji", "ttf-liberation"];

    /// Any of ko, ja, zh
    pub const CJK: &[&str] = &["noto-fonts-cjk"];

    pub const KOREAN: &[&str] = &["ttf-baekmuk"];
}

/// Input method packages by engine, plus per-language addons.
pub mod input_method_packages {
    /// Runtime for the kime daemon; kime itself is installed after first boot
    pub const KIME: &[&str] = &["gtk3", "gtk4", "qt5-base", "qt6-base", "qt6-tools"];

    pub const FCITX5: &[&str] = &["fcitx5", "fcitx5-configtool", "fcitx5-gtk", "fcitx5-qt"];
    pub const FCITX5_KOREAN: &[&str] = &["fcitx5-hangul"];
    pub const FCITX5_JAPANESE: &[&str] = &["fcitx5-mozc"];
    pub const FCITX5_CHINESE: &[&str] = &["fcitx5-chinese-addons"];

    pub const IBUS: &[&str] = &["ibus"];
    pub const IBUS_KOREAN: &[&str] = &["ibus-hangul"];
    pub const IBUS_JAPANESE: &[&str] = &["ibus-mozc"];
}

/// Hardware driver packages, installed in the chroot after detection.
pub mod gpu_packages {
    pub const NVIDIA: &[&str] = &[
        "nvidia",
        "nvidia-utils",
        "nvidia-settings",
        "lib32-nvidia-utils",
        "libva-nvidia-driver",
    ];

    pub const AMD: &[&str] = &[
        "xf86-video-amdgpu",
        "vulkan-radeon",
        "lib32-vulkan-radeon",
        "libva-mesa-driver",
        "lib32-libva-mesa-driver",
        "mesa-vdpau",
    ];

    pub const INTEL: &[&str] = &["vulkan-intel", "lib32-vulkan-intel", "intel-media-driver"];

    /// Broadcom wireless
    pub const BROADCOM: &[&str] = &["broadcom-wl-dkms"];
}

/// Services enabled after the base pass.
pub mod services {
    pub const NETWORK: &str = "NetworkManager";
    pub const DISPLAY_MANAGER: &str = "sddm";
    pub const PRINTING: &str = "cups";
}

/// Returns true for packages that live in the `[multilib]` repository
pub fn is_multilib(package: &str) -> bool {
    package.starts_with("lib32-")
}
