fn main() {
    // Static web assets are flashed to the SPIFFS partition separately;
    // rebuild when the partition table changes so the mount label stays in sync.
    println!("cargo:rerun-if-changed=partitions.csv");

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
