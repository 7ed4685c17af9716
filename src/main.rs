fn main() {
    launchkeeper_lib::run()
}
